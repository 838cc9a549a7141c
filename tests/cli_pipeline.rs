use std::fs;
use std::path::{Path, PathBuf};
use std::process::{Command, Output};

use tempfile::{TempDir, tempdir};

const OBO: &str = "\
format-version: 1.2

[Term]
id: T:root
name: disease

[Term]
id: T:organ
name: organ disease
is_a: T:root

[Term]
id: T:heart
name: heart disease
is_a: T:organ

[Term]
id: T:valve
name: valve disease
relationship: part_of T:heart

[Term]
id: T:metabolic
name: metabolic disease
is_a: T:root
";

fn cluster(prefix: &str, n: usize) -> Vec<String> {
    (0..n).map(|i| format!("{prefix}{i}")).collect()
}

/// Two ten-gene clusters joined by weak edges, plus five genes without any edge.
fn edges() -> Vec<(String, String, f32)> {
    let mut edges = Vec::new();
    for genes in [cluster("H", 10), cluster("M", 10)] {
        for i in 0..genes.len() {
            for j in (i + 1)..genes.len() {
                edges.push((genes[i].clone(), genes[j].clone(), 0.8));
            }
        }
    }
    for i in 0..3 {
        edges.push((format!("H{i}"), format!("M{i}"), 0.1));
    }
    edges
}

fn all_genes() -> Vec<String> {
    let mut genes = cluster("H", 10);
    genes.extend(cluster("M", 10));
    genes.extend(cluster("U", 5));
    genes
}

fn write_dat(path: &Path) {
    let mut text = String::from("# gene1\tgene2\tvalue\n");
    for (a, b, value) in edges() {
        text.push_str(&format!("{a}\t{b}\t{value}\n"));
    }
    fs::write(path, text).unwrap();
}

fn write_dab(path: &Path) {
    let genes = all_genes();
    let n = genes.len();
    let mut bytes = (n as u32).to_le_bytes().to_vec();
    for gene in &genes {
        for unit in gene.encode_utf16() {
            bytes.extend(unit.to_le_bytes());
        }
        bytes.extend(0u16.to_le_bytes());
    }
    let mut values = vec![f32::NAN; n * (n - 1) / 2];
    let index = |g: &str| genes.iter().position(|x| x == g).unwrap();
    for (a, b, value) in edges() {
        let (i, j) = {
            let (i, j) = (index(&a), index(&b));
            (i.min(j), i.max(j))
        };
        values[i * (2 * n - i - 1) / 2 + (j - i - 1)] = value;
    }
    for value in values {
        bytes.extend(value.to_le_bytes());
    }
    fs::write(path, bytes).unwrap();
}

struct Fixture {
    dir: TempDir,
}

impl Fixture {
    fn new() -> Self {
        let dir = tempdir().unwrap();
        write_dat(&dir.path().join("net.dat"));
        write_dab(&dir.path().join("net.dab"));
        fs::write(dir.path().join("disease.obo"), OBO).unwrap();

        let line = |id: &str, genes: &[String]| format!("{id}\t{id}\t{}\n", genes.join("\t"));
        let heart = cluster("H", 10);
        let mut gmt = line("T:valve", &heart[..4]);
        gmt.push_str(&line("T:heart", &heart[4..]));
        gmt.push_str(&line("T:metabolic", &cluster("M", 10)));
        fs::write(dir.path().join("sets.gmt"), gmt).unwrap();

        let labels = dir.path().join("labels");
        fs::create_dir(&labels).unwrap();
        let mut set1 = String::from("# heart genes against metabolic genes\n");
        for gene in cluster("H", 6) {
            set1.push_str(&format!("{gene}\t1\n"));
        }
        for gene in cluster("M", 5) {
            set1.push_str(&format!("{gene}\t-1\n"));
        }
        fs::write(labels.join("set1"), set1).unwrap();
        fs::write(labels.join("tiny"), "H0\t1\nH1\t-1\nM0\t-1\nU0\t0\n").unwrap();

        Self { dir }
    }

    fn path(&self, name: &str) -> PathBuf {
        self.dir.path().join(name)
    }

    fn run(&self, args: &[&str]) -> Output {
        Command::new(env!("CARGO_BIN_EXE_netsvm"))
            .current_dir(self.dir.path())
            .args(args)
            .output()
            .expect("run netsvm")
    }

    fn run_ontology(&self, out: &str, extra: &[&str]) -> Output {
        let mut args = vec![
            "-i",
            "net.dat",
            "-o",
            out,
            "--gmt",
            "sets.gmt",
            "--obo",
            "disease.obo",
            "-t",
            "2",
        ];
        args.extend_from_slice(extra);
        self.run(&args)
    }
}

fn data_rows(path: &Path) -> Vec<Vec<String>> {
    let text = fs::read_to_string(path).unwrap();
    let mut lines = text.lines();
    assert_eq!(lines.next(), Some("gene\tlabel\tscore\tsource"));
    lines
        .map(|line| line.split('\t').map(str::to_string).collect())
        .collect()
}

#[test]
fn ontology_labels_produce_one_ranked_file_per_eligible_term() {
    let fixture = Fixture::new();
    let output = fixture.run_ontology("out", &["--summary", "summary.tsv"]);
    assert!(output.status.success(), "netsvm failed: {output:?}");

    // T:valve has four positives and is below the default minimum of five.
    assert!(!fixture.path("out/T:valve").exists());

    let rows = data_rows(&fixture.path("out/T:heart"));
    // Ten positives plus the fifteen other matrix genes as implicit negatives.
    assert_eq!(rows.len(), 25);
    assert!(rows.iter().all(|row| row[3] == "heldout"));
    let scores: Vec<f64> = rows.iter().map(|row| row[2].parse().unwrap()).collect();
    assert!(scores.windows(2).all(|pair| pair[0] >= pair[1]));
    let top: Vec<&str> = rows[..5].iter().map(|row| row[1].as_str()).collect();
    assert_eq!(top, vec!["1"; 5]);

    let summary = fs::read_to_string(fixture.path("summary.tsv")).unwrap();
    let terms: Vec<&str> = summary
        .lines()
        .skip(1)
        .map(|line| line.split('\t').next().unwrap())
        .collect();
    assert_eq!(terms, vec!["T:heart", "T:metabolic", "T:organ", "T:root"]);
}

#[test]
fn predict_all_scores_every_matrix_gene() {
    let fixture = Fixture::new();
    let output = fixture.run_ontology("all", &["-a", "-b"]);
    assert!(output.status.success(), "netsvm failed: {output:?}");

    let rows = data_rows(&fixture.path("all/T:metabolic"));
    let mut genes: Vec<String> = rows.iter().map(|row| row[0].clone()).collect();
    genes.sort();
    let mut expected = all_genes();
    expected.sort();
    assert_eq!(genes, expected);
}

#[test]
fn repeated_runs_are_byte_identical() {
    let fixture = Fixture::new();
    for out in ["first", "second"] {
        let output = fixture.run_ontology(out, &["-a", "--seed", "17"]);
        assert!(output.status.success(), "netsvm failed: {output:?}");
    }
    for term in ["T:heart", "T:metabolic", "T:organ", "T:root"] {
        let first = fs::read(fixture.path("first").join(term)).unwrap();
        let second = fs::read(fixture.path("second").join(term)).unwrap();
        assert_eq!(first, second, "{term} differs between runs");
    }
}

#[test]
fn directory_labels_with_a_binary_matrix() {
    let fixture = Fixture::new();
    let output = fixture.run(&["-i", "net.dab", "-o", "dir_out", "-d", "labels"]);
    assert!(output.status.success(), "netsvm failed: {output:?}");

    // Explicit negatives: six positives and five negatives, nothing else.
    let rows = data_rows(&fixture.path("dir_out/set1"));
    assert_eq!(rows.len(), 11);
    assert_eq!(rows.iter().filter(|row| row[1] == "1").count(), 6);
    assert_eq!(rows.iter().filter(|row| row[1] == "-1").count(), 5);

    // One positive among four labeled genes is filtered out.
    assert!(!fixture.path("dir_out/tiny").exists());
}

#[test]
fn config_file_supplies_settings() {
    let fixture = Fixture::new();
    fs::write(
        fixture.path("run.toml"),
        "input = \"net.dat\"\noutput = \"from_config\"\ndir = \"labels\"\nmin_pos = 1\nthreads = 1\n",
    )
    .unwrap();

    let output = fixture.run(&["--config", "run.toml"]);
    assert!(output.status.success(), "netsvm failed: {output:?}");
    assert!(fixture.path("from_config/set1").exists());
    // min_pos = 1 admits the single-positive term, which then cannot form folds.
    assert!(!fixture.path("from_config/tiny").exists());
}

#[test]
fn fatal_errors_exit_with_status_one() {
    let fixture = Fixture::new();
    let missing = fixture.run(&["-i", "absent.dab", "-o", "out", "-d", "labels"]);
    assert_eq!(missing.status.code(), Some(1));

    let unsupported = fixture.run(&["-i", "disease.obo", "-o", "out", "-d", "labels"]);
    assert_eq!(unsupported.status.code(), Some(1));

    let no_labels = fixture.run(&["-i", "net.dat", "-o", "out"]);
    assert_eq!(no_labels.status.code(), Some(1));
}

// ========================================================================================
//
//                           RUN CONFIGURATION: FILE, FLAGS, DEFAULTS
//
// ========================================================================================
//
// Settings come from up to two layers: an optional TOML file and the command line.
// Both deserialize into the same all-optional `ConfigLayer`; the command line layer is
// merged over the file layer and the result is validated once into a `RunConfig`,
// which is then passed by reference to everything that needs it.

use crate::classifier::ClassifierSettings;
use crate::labels::EligibilityBounds;
use crate::matrix::DEFAULT_MISSING_VALUE;
use crate::types::PredictOptions;
use serde::Deserialize;
use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use thiserror::Error;

/// Worker threads used when neither the file nor the command line sets them.
pub const DEFAULT_THREADS: usize = 12;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Reading configuration file {path}: {source}")]
    Read { path: PathBuf, source: io::Error },
    #[error("Parsing configuration file {path}: {source}")]
    Parse {
        path: PathBuf,
        source: toml::de::Error,
    },
    #[error("No association matrix was given. Use --input or set 'input' in the configuration file.")]
    MissingMatrix,
    #[error("No output directory was given. Use --output or set 'output' in the configuration file.")]
    MissingOutput,
    #[error(
        "No label source was given. Use --gmt together with --obo for ontology labels, or --dir for a label directory."
    )]
    MissingLabelSource,
    #[error("Ontology labels (--gmt/--obo) and directory labels (--dir) cannot be combined.")]
    ConflictingLabelSources,
    #[error("Ontology labels need both a gene-set file (--gmt) and an ontology (--obo).")]
    IncompleteOntologySource,
    #[error("A slim list (--slim) only applies to ontology labels.")]
    SlimWithoutOntology,
    #[error("The minimum number of positives ({min}) exceeds the maximum ({max}).")]
    InvalidBounds { min: usize, max: usize },
    #[error("The minimum number of positives must be at least 1.")]
    ZeroMinPositives,
    #[error("Cross-validation needs at least 2 folds, got {0}.")]
    TooFewFolds(usize),
    #[error("The cost grid is empty.")]
    EmptyCostGrid,
    #[error("SVM costs must be positive and finite, got {0}.")]
    InvalidCost(f64),
    #[error("The solver tolerance must be positive and finite, got {0}.")]
    InvalidTolerance(f64),
    #[error("The missing value must be finite, got {0}.")]
    InvalidMissingValue(f64),
}

/// One layer of settings. Every field is optional so layers can be stacked.
#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct ConfigLayer {
    pub input: Option<PathBuf>,
    pub output: Option<PathBuf>,
    pub gmt: Option<PathBuf>,
    pub obo: Option<PathBuf>,
    pub slim: Option<PathBuf>,
    pub dir: Option<PathBuf>,
    pub all: Option<bool>,
    pub best_params: Option<bool>,
    pub threads: Option<usize>,
    pub min_pos: Option<usize>,
    pub max_pos: Option<usize>,
    pub max_negatives: Option<usize>,
    pub folds: Option<usize>,
    pub seed: Option<u64>,
    pub missing_value: Option<f64>,
    pub summary: Option<PathBuf>,
    pub cost_grid: Option<Vec<f64>>,
    pub default_cost: Option<f64>,
    pub tolerance: Option<f64>,
    pub max_iterations: Option<usize>,
}

impl ConfigLayer {
    /// Reads a TOML configuration file. Relative paths inside it are taken
    /// relative to the file's own directory.
    pub fn from_toml_file(path: &Path) -> Result<Self, ConfigError> {
        let text = fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.to_path_buf(),
            source,
        })?;
        let layer: Self = toml::from_str(&text).map_err(|source| ConfigError::Parse {
            path: path.to_path_buf(),
            source,
        })?;
        let base = path.parent().unwrap_or_else(|| Path::new(""));
        Ok(layer.relative_to(base))
    }

    fn relative_to(mut self, base: &Path) -> Self {
        for slot in [
            &mut self.input,
            &mut self.output,
            &mut self.gmt,
            &mut self.obo,
            &mut self.slim,
            &mut self.dir,
            &mut self.summary,
        ] {
            if let Some(path) = slot.take() {
                *slot = Some(if path.is_relative() {
                    base.join(path)
                } else {
                    path
                });
            }
        }
        self
    }

    /// Combines two layers; values set in `self` win over those in `lower`.
    pub fn over(self, lower: ConfigLayer) -> ConfigLayer {
        ConfigLayer {
            input: self.input.or(lower.input),
            output: self.output.or(lower.output),
            gmt: self.gmt.or(lower.gmt),
            obo: self.obo.or(lower.obo),
            slim: self.slim.or(lower.slim),
            dir: self.dir.or(lower.dir),
            all: self.all.or(lower.all),
            best_params: self.best_params.or(lower.best_params),
            threads: self.threads.or(lower.threads),
            min_pos: self.min_pos.or(lower.min_pos),
            max_pos: self.max_pos.or(lower.max_pos),
            max_negatives: self.max_negatives.or(lower.max_negatives),
            folds: self.folds.or(lower.folds),
            seed: self.seed.or(lower.seed),
            missing_value: self.missing_value.or(lower.missing_value),
            summary: self.summary.or(lower.summary),
            cost_grid: self.cost_grid.or(lower.cost_grid),
            default_cost: self.default_cost.or(lower.default_cost),
            tolerance: self.tolerance.or(lower.tolerance),
            max_iterations: self.max_iterations.or(lower.max_iterations),
        }
    }

    /// Fills in defaults and checks the combined settings.
    pub fn into_run_config(self) -> Result<RunConfig, ConfigError> {
        let matrix_path = self.input.ok_or(ConfigError::MissingMatrix)?;
        let output_dir = self.output.ok_or(ConfigError::MissingOutput)?;

        let label_source = match (self.gmt, self.obo, self.dir) {
            (Some(_), _, Some(_)) | (_, Some(_), Some(_)) => {
                return Err(ConfigError::ConflictingLabelSources);
            }
            (Some(gmt), Some(obo), None) => LabelSourceConfig::Ontology {
                gmt,
                obo,
                slim: self.slim,
            },
            (Some(_), None, None) | (None, Some(_), None) => {
                return Err(ConfigError::IncompleteOntologySource);
            }
            (None, None, Some(dir)) => {
                if self.slim.is_some() {
                    return Err(ConfigError::SlimWithoutOntology);
                }
                LabelSourceConfig::Directory { dir }
            }
            (None, None, None) => return Err(ConfigError::MissingLabelSource),
        };

        let default_bounds = EligibilityBounds::default();
        let bounds = EligibilityBounds {
            min_positives: self.min_pos.unwrap_or(default_bounds.min_positives),
            max_positives: self.max_pos.unwrap_or(default_bounds.max_positives),
        };
        if bounds.min_positives == 0 {
            return Err(ConfigError::ZeroMinPositives);
        }
        if bounds.min_positives > bounds.max_positives {
            return Err(ConfigError::InvalidBounds {
                min: bounds.min_positives,
                max: bounds.max_positives,
            });
        }

        let defaults = ClassifierSettings::default();
        let classifier = ClassifierSettings {
            seed: self.seed.unwrap_or(defaults.seed),
            max_negatives: self.max_negatives.unwrap_or(defaults.max_negatives),
            folds: self.folds.unwrap_or(defaults.folds),
            default_cost: self.default_cost.unwrap_or(defaults.default_cost),
            cost_grid: self.cost_grid.unwrap_or(defaults.cost_grid),
            tolerance: self.tolerance.unwrap_or(defaults.tolerance),
            max_iterations: self.max_iterations.unwrap_or(defaults.max_iterations),
        };
        if classifier.folds < 2 {
            return Err(ConfigError::TooFewFolds(classifier.folds));
        }
        if classifier.cost_grid.is_empty() {
            return Err(ConfigError::EmptyCostGrid);
        }
        if let Some(&bad) = classifier
            .cost_grid
            .iter()
            .chain(std::iter::once(&classifier.default_cost))
            .find(|&&cost| !(cost.is_finite() && cost > 0.0))
        {
            return Err(ConfigError::InvalidCost(bad));
        }
        if !(classifier.tolerance.is_finite() && classifier.tolerance > 0.0) {
            return Err(ConfigError::InvalidTolerance(classifier.tolerance));
        }

        let missing_value = self.missing_value.unwrap_or(DEFAULT_MISSING_VALUE);
        if !missing_value.is_finite() {
            return Err(ConfigError::InvalidMissingValue(missing_value));
        }

        Ok(RunConfig {
            matrix_path,
            output_dir,
            label_source,
            predict: PredictOptions {
                predict_all: self.all.unwrap_or(false),
                best_params: self.best_params.unwrap_or(false),
            },
            threads: self.threads.unwrap_or(DEFAULT_THREADS),
            bounds,
            classifier,
            missing_value,
            summary_path: self.summary,
        })
    }
}

/// Which label source a run uses.
#[derive(Debug, Clone, PartialEq)]
pub enum LabelSourceConfig {
    Ontology {
        gmt: PathBuf,
        obo: PathBuf,
        slim: Option<PathBuf>,
    },
    Directory {
        dir: PathBuf,
    },
}

/// Validated settings of one run.
#[derive(Debug, Clone, PartialEq)]
pub struct RunConfig {
    pub matrix_path: PathBuf,
    pub output_dir: PathBuf,
    pub label_source: LabelSourceConfig,
    pub predict: PredictOptions,
    /// Worker count; `0` means one per logical core.
    pub threads: usize,
    pub bounds: EligibilityBounds,
    pub classifier: ClassifierSettings,
    pub missing_value: f64,
    pub summary_path: Option<PathBuf>,
}

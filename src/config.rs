use serde::{Deserialize, Serialize};
use std::path::Path;

use crate::args::Arguments;

pub type Result<T> = std::result::Result<T, Error>;

#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("IO error, source: {source:?}, path: {path:?}")]
    Io {
        source: std::io::Error,
        path: std::path::PathBuf,
    },

    #[error("toml deserialize error: {0}")]
    TomlDeserializeError(#[from] toml::de::Error),

    #[error("toml serialize error: {0}")]
    TomlSerializeError(#[from] toml::ser::Error),

    #[error("invalid config: {0}")]
    Invalid(String),
}

/// An external program plus the leading arguments placed before the
/// stage-specific ones, e.g. an interpreter and its script.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
pub struct ToolSpec {
    pub program: String,
    #[serde(default)]
    pub args: Vec<String>,
}

#[cfg(test)]
impl ToolSpec {
    pub fn new(program: &str) -> Self {
        Self {
            program: program.to_owned(),
            args: vec![],
        }
    }
}

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
pub struct Tools {
    pub vcf_filter: ToolSpec,
    pub hapmap_filter: ToolSpec,
    pub sequence_generator: ToolSpec,
    pub aligner: ToolSpec,
    pub tree_builder: ToolSpec,
    pub bootstrap: ToolSpec,
}

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
pub struct PipelineConfig {
    /// minimum number of lines of a text genotype file, checked before and
    /// after filtering
    pub min_input_lines: usize,
    /// bounds on the length of a generated SNP sequence
    pub min_seq_len: usize,
    pub max_seq_len: usize,
    pub tools: Tools,
}

impl PipelineConfig {
    /// config file given by `--config`, or the builtin one
    pub fn from_args(args: &Arguments) -> Result<Self> {
        match args.config.as_ref() {
            Some(path) => Self::new_from_toml_file(path),
            None => Self::new_from_builtin(),
        }
    }

    pub fn new_from_toml_file<P>(path: P) -> Result<Self>
    where
        P: AsRef<Path>,
    {
        let p: &Path = path.as_ref();
        let toml_str = std::fs::read_to_string(p).map_err(|e| Error::Io {
            source: e,
            path: p.to_owned(),
        })?;
        let config: PipelineConfig = toml::from_str(&toml_str)?;
        config.check()?;
        Ok(config)
    }

    pub fn new_from_builtin() -> Result<Self> {
        let toml_str = r#"
min_input_lines = 50000
min_seq_len = 500
max_seq_len = 50000

[tools.vcf_filter]
program = "python3"
args = ["remove_low_depth_genotype_data.py"]

[tools.hapmap_filter]
program = "python3"
args = ["remove_no_genotype_data.py"]

[tools.sequence_generator]
program = "Rscript"
args = ["--vanilla", "generate_snp_sequence.R"]

[tools.aligner]
program = "muscle"

[tools.tree_builder]
program = "dnaml"

[tools.bootstrap]
program = "Rscript"
args = ["--vanilla", "draw_bootstrap_tree.R"]
    "#;

        let config: PipelineConfig = toml::from_str(toml_str)?;
        config.check()?;
        Ok(config)
    }

    pub fn to_toml_string(&self) -> Result<String> {
        Ok(toml::to_string(self)?)
    }

    fn check(&self) -> Result<()> {
        if self.min_seq_len > self.max_seq_len {
            return Err(Error::Invalid(format!(
                "min_seq_len ({}) is larger than max_seq_len ({})",
                self.min_seq_len, self.max_seq_len
            )));
        }
        let t = &self.tools;
        for (name, spec) in [
            ("vcf_filter", &t.vcf_filter),
            ("hapmap_filter", &t.hapmap_filter),
            ("sequence_generator", &t.sequence_generator),
            ("aligner", &t.aligner),
            ("tree_builder", &t.tree_builder),
            ("bootstrap", &t.bootstrap),
        ] {
            if spec.program.trim().is_empty() {
                return Err(Error::Invalid(format!("tools.{name}.program is empty")));
            }
        }
        Ok(())
    }
}

#[test]
fn builtin_config() {
    let config = PipelineConfig::new_from_builtin().unwrap();
    assert_eq!(config.min_input_lines, 50000);
    assert_eq!(config.min_seq_len, 500);
    assert_eq!(config.max_seq_len, 50000);
    assert_eq!(config.tools.aligner, ToolSpec::new("muscle"));
    assert_eq!(config.tools.tree_builder, ToolSpec::new("dnaml"));
    assert_eq!(config.tools.vcf_filter.program, "python3");
}

#[test]
fn config_from_toml_file() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("config.toml");
    let mut config = PipelineConfig::new_from_builtin().unwrap();
    config.min_input_lines = 10;
    config.tools.aligner = ToolSpec {
        program: "/opt/muscle/bin/muscle".into(),
        args: vec!["-quiet".into()],
    };
    std::fs::write(&path, config.to_toml_string().unwrap()).unwrap();

    let loaded = PipelineConfig::new_from_toml_file(&path).unwrap();
    assert_eq!(loaded, config);
}

#[test]
fn config_rejects_inverted_sequence_bounds() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("config.toml");
    let mut config = PipelineConfig::new_from_builtin().unwrap();
    config.min_seq_len = 100;
    config.max_seq_len = 10;
    std::fs::write(&path, config.to_toml_string().unwrap()).unwrap();
    assert!(matches!(
        PipelineConfig::new_from_toml_file(&path),
        Err(Error::Invalid(_))
    ));
}

#[test]
fn config_missing_file() {
    assert!(matches!(
        PipelineConfig::new_from_toml_file("/nonexistent/snphylo.toml"),
        Err(Error::Io { .. })
    ));
}

#[test]
fn config_from_args() {
    let mut args = Arguments::new_for_test("a.vcf");
    assert_eq!(
        PipelineConfig::from_args(&args).unwrap(),
        PipelineConfig::new_from_builtin().unwrap()
    );
    args.config = Some("/nonexistent/snphylo.toml".into());
    assert!(PipelineConfig::from_args(&args).is_err());
}

use std::path::{Path, PathBuf};

use crate::{
    alignment,
    args::Arguments,
    config::{self, PipelineConfig},
    filter::{self, FilterParams, FilterReport},
    input::{self, GenotypeFile, InputFormat},
    sequence::{self, SequenceParams},
    tree::{self, TreeFiles},
};

pub type Result<T> = std::result::Result<T, Error>;

#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("{0}")]
    CliArgError(String),
    #[error(transparent)]
    Config(#[from] config::Error),
    #[error(transparent)]
    Input(#[from] input::Error),
    #[error(transparent)]
    Filter(#[from] filter::Error),
    #[error(transparent)]
    Sequence(#[from] sequence::Error),
    #[error(transparent)]
    Alignment(#[from] alignment::Error),
    #[error(transparent)]
    Tree(#[from] tree::Error),
}

#[derive(Debug)]
pub struct PipelineOutputs {
    pub filter: Option<FilterReport>,
    pub fasta: PathBuf,
    pub alignment: PathBuf,
    pub ml_tree: TreeFiles,
    pub bootstrap_tree: Option<PathBuf>,
}

impl PipelineOutputs {
    /// Completion message listing the result files.
    pub fn summary(&self) -> String {
        let mut s = String::from("Pipeline finished. Output files:\n");
        s.push_str(&format!("  ML tree:        {}\n", self.ml_tree.tree.display()));
        s.push_str(&format!("  ML report:      {}\n", self.ml_tree.report.display()));
        if let Some(bs) = self.bootstrap_tree.as_ref() {
            s.push_str(&format!("  bootstrap tree: {}\n", bs.display()));
        }
        s.push_str(&format!("  alignment:      {}\n", self.alignment.display()));
        s.push_str(&format!("  SNP sequences:  {}\n", self.fasta.display()));
        s
    }
}

pub struct Pipeline {
    args: Arguments,
    config: PipelineConfig,
    workdir: PathBuf,
    format: InputFormat,
    input_path: PathBuf,
}

fn check_fraction(name: &str, flag: char, value: f64, max: f64) -> Result<()> {
    if (0.0..=max).contains(&value) {
        Ok(())
    } else {
        Err(Error::CliArgError(format!(
            "{name} (-{flag}) must be between 0 and {max}, got {value}"
        )))
    }
}

impl Pipeline {
    /// Validate arguments against the config. Relative paths in `args` are
    /// taken relative to `workdir`, where all external programs run.
    pub fn new(args: Arguments, config: PipelineConfig, workdir: impl Into<PathBuf>) -> Result<Self> {
        let workdir = workdir.into();
        let (format, path) = args.input().ok_or_else(|| {
            Error::CliArgError("exactly one of -v, -H or -d must be given".into())
        })?;
        let input_path = workdir.join(path);

        check_fraction("LD threshold", 'l', args.ld, 1.0)?;
        check_fraction("MAF threshold", 'm', args.maf, 1.0)?;
        check_fraction("missing rate threshold", 'M', args.missing, 1.0)?;
        check_fraction("percent of low coverage samples", 'p', args.max_percent, 100.0)?;
        if args.bootstrap && args.num_bootstrap == 0 {
            return Err(Error::CliArgError(
                "the number of bootstrap replicates (-B) must be positive".into(),
            ));
        }
        if let Some(name) = args.outgroup.as_ref() {
            if name.trim().is_empty() {
                return Err(Error::CliArgError("the outgroup name (-o) is empty".into()));
            }
        }

        let prefix = args.prefix.as_str();
        if prefix.is_empty() || prefix.ends_with('/') {
            return Err(Error::CliArgError(format!(
                "invalid output prefix (-P): {prefix:?}"
            )));
        }
        if let Some(parent) = Path::new(prefix).parent() {
            let parent = workdir.join(parent);
            if !parent.is_dir() {
                return Err(Error::CliArgError(format!(
                    "the directory of the output prefix does not exist: {}",
                    parent.display()
                )));
            }
        }

        Ok(Self {
            args,
            config,
            workdir,
            format,
            input_path,
        })
    }

    fn prefix(&self) -> &str {
        &self.args.prefix
    }

    /// Run all stages in order. The first failure stops the pipeline.
    pub fn run(&self) -> Result<PipelineOutputs> {
        let args = &self.args;
        let workdir = self.workdir.as_path();

        log::info!("checking {} file {}", self.format, self.input_path.display());
        let input =
            GenotypeFile::open(self.format, &self.input_path, self.config.min_input_lines)?;

        let (genotype, filter) = if !self.format.is_text() {
            log::info!("{} input is used without filtering", self.format);
            (input, None)
        } else if args.skip_filter {
            log::info!("skipping removal of low quality data");
            (input, None)
        } else {
            let params = FilterParams {
                min_depth: args.min_depth,
                max_percent: args.max_percent,
            };
            let report =
                filter::remove_low_quality_data(&input, params, &self.config, workdir, self.prefix())?;
            (report.filtered.clone(), Some(report))
        };

        let params = SequenceParams {
            ld: args.ld,
            maf: args.maf,
            missing: args.missing,
            num_chr: args.num_chr,
        };
        let seqs =
            sequence::generate_snp_sequences(&genotype, params, &self.config, workdir, self.prefix())?;

        let phylip = alignment::align_sequences(&seqs.fasta, &self.config, workdir, self.prefix())?;

        let outgroup_index = match args.outgroup.as_deref() {
            Some(name) => {
                let idx = alignment::find_outgroup_index(&phylip, name)?;
                log::info!("outgroup {name} is sequence #{idx} of the alignment");
                Some(idx)
            }
            None => None,
        };

        let ml_tree =
            tree::build_ml_tree(&phylip, outgroup_index, &self.config, workdir, self.prefix())?;

        let bootstrap_tree = if args.bootstrap {
            Some(tree::build_bootstrap_tree(
                &phylip,
                args.num_bootstrap,
                args.outgroup.as_deref(),
                &self.config,
                workdir,
                self.prefix(),
            )?)
        } else {
            None
        };

        Ok(PipelineOutputs {
            filter,
            fasta: seqs.fasta,
            alignment: phylip,
            ml_tree,
            bootstrap_tree,
        })
    }
}

#[cfg(all(test, unix))]
mod fake_tools {
    use super::*;
    use crate::tools::{script_spec, write_script};

    /// Config whose external programs are shell scripts that mimic the
    /// real ones: the filter drops lines containing "low", the generator
    /// writes two sequences of `seq_len` bases, the aligner writes a
    /// PHYLIP file with samples "ref" and "sample2".
    pub fn config(dir: &Path, seq_len: usize) -> PipelineConfig {
        let filter = write_script(dir, "filter.sh", r#"grep -v low "$1""#);
        let generator = write_script(
            dir,
            "generate.sh",
            &format!(
                r#"printf '>ref\n%s\n>sample2\n%s\n' {seq} {seq} > "$7.fasta""#,
                seq = "A".repeat(seq_len)
            ),
        );
        let aligner = write_script(
            dir,
            "muscle.sh",
            r#"printf ' 2 4\nref       ACGT\nsample2   ACGA\n' > "$5""#,
        );
        let dnaml = write_script(
            dir,
            "dnaml.sh",
            r#"cat > dnaml.menu
echo "(ref,sample2);" > outtree
echo "dnaml report" > outfile"#,
        );
        let bootstrap = write_script(dir, "bootstrap.sh", r#"echo "(ref,sample2);" > "$3.bs.tree""#);

        let mut config = PipelineConfig::new_from_builtin().unwrap();
        config.min_input_lines = 3;
        config.tools.vcf_filter = script_spec(&filter);
        config.tools.hapmap_filter = script_spec(&filter);
        config.tools.sequence_generator = script_spec(&generator);
        config.tools.aligner = script_spec(&aligner);
        config.tools.tree_builder = script_spec(&dnaml);
        config.tools.bootstrap = script_spec(&bootstrap);
        config
    }

    pub fn vcf(dir: &Path) -> PathBuf {
        let vcf = dir.join("input.vcf");
        std::fs::write(&vcf, "#header\nsnp1\nsnp2 low\nsnp3\nsnp4\n").unwrap();
        vcf
    }
}

#[cfg(unix)]
#[test]
fn full_run_produces_renamed_trees() {
    let dir = tempfile::tempdir().unwrap();
    let config = fake_tools::config(dir.path(), 600);
    let vcf = fake_tools::vcf(dir.path());
    let mut args = Arguments::new_for_test(&vcf);
    args.prefix = "run".into();

    let outputs = Pipeline::new(args, config, dir.path())
        .unwrap()
        .run()
        .unwrap();

    let filter = outputs.filter.as_ref().unwrap();
    assert_eq!(filter.lines_before, 5);
    assert_eq!(filter.lines_after, 4);
    assert_eq!(filter.removed(), 1);
    assert_eq!(outputs.ml_tree.tree, dir.path().join("run.ml.tree"));
    assert_eq!(outputs.ml_tree.report, dir.path().join("run.ml.txt"));
    assert!(outputs.ml_tree.tree.is_file());
    assert!(outputs.ml_tree.report.is_file());
    assert!(outputs.bootstrap_tree.is_none());
    assert!(!dir.path().join("outtree").exists());
    let menu = std::fs::read_to_string(dir.path().join("dnaml.menu")).unwrap();
    assert_eq!(menu, "run.phylip.txt\nY\n");
    assert!(outputs.summary().contains("run.ml.tree"));
}

#[cfg(unix)]
#[test]
fn outgroup_and_bootstrap() {
    let dir = tempfile::tempdir().unwrap();
    let config = fake_tools::config(dir.path(), 600);
    let vcf = fake_tools::vcf(dir.path());
    let mut args = Arguments::new_for_test(&vcf);
    args.prefix = "run".into();
    args.outgroup = Some("sample2".into());
    args.bootstrap = true;

    let outputs = Pipeline::new(args, config, dir.path())
        .unwrap()
        .run()
        .unwrap();
    let menu = std::fs::read_to_string(dir.path().join("dnaml.menu")).unwrap();
    assert_eq!(menu, "run.phylip.txt\nO\n2\nY\n");
    assert_eq!(outputs.bootstrap_tree, Some(dir.path().join("run.bs.tree")));
}

#[cfg(unix)]
#[test]
fn unknown_outgroup_stops_before_tree() {
    let dir = tempfile::tempdir().unwrap();
    let config = fake_tools::config(dir.path(), 600);
    let vcf = fake_tools::vcf(dir.path());
    let mut args = Arguments::new_for_test(&vcf);
    args.prefix = "run".into();
    args.outgroup = Some("nobody".into());

    let res = Pipeline::new(args, config, dir.path()).unwrap().run();
    match res {
        Err(Error::Alignment(alignment::Error::OutgroupNotFound { name, .. })) => {
            assert_eq!(name, "nobody")
        }
        x => panic!("unexpected result: {x:?}"),
    }
    assert!(!dir.path().join("run.ml.tree").exists());
    assert!(!dir.path().join("dnaml.menu").exists());
}

#[cfg(unix)]
#[test]
fn short_sequences_are_rejected() {
    let dir = tempfile::tempdir().unwrap();
    let config = fake_tools::config(dir.path(), 100);
    let vcf = fake_tools::vcf(dir.path());
    let mut args = Arguments::new_for_test(&vcf);
    args.prefix = "run".into();
    assert!(matches!(
        Pipeline::new(args, config, dir.path()).unwrap().run(),
        Err(Error::Sequence(sequence::Error::SequenceLength { len: 100, .. }))
    ));
}

#[cfg(unix)]
#[test]
fn small_input_is_rejected() {
    let dir = tempfile::tempdir().unwrap();
    let mut config = fake_tools::config(dir.path(), 600);
    config.min_input_lines = 50_000;
    let vcf = fake_tools::vcf(dir.path());
    let args = Arguments::new_for_test(&vcf);
    assert!(matches!(
        Pipeline::new(args, config, dir.path()).unwrap().run(),
        Err(Error::Input(input::Error::TooFewLines { nlines: 5, .. }))
    ));
}

#[cfg(unix)]
#[test]
fn gds_and_skip_filter_bypass_the_filter() {
    let dir = tempfile::tempdir().unwrap();
    let gds = dir.path().join("input.gds");
    std::fs::write(&gds, [0u8, 159, 1]).unwrap();
    let mut args = Arguments::new_for_test("unused");
    args.input.vcf = None;
    args.input.gds = Some(gds);
    args.prefix = "gds".into();
    let config = fake_tools::config(dir.path(), 600);
    let outputs = Pipeline::new(args, config, dir.path())
        .unwrap()
        .run()
        .unwrap();
    assert!(outputs.filter.is_none());
    assert!(!dir.path().join("gds.filtered.gds").exists());

    let vcf = fake_tools::vcf(dir.path());
    let mut args = Arguments::new_for_test(&vcf);
    args.prefix = "raw".into();
    args.skip_filter = true;
    let config = fake_tools::config(dir.path(), 600);
    let outputs = Pipeline::new(args, config, dir.path())
        .unwrap()
        .run()
        .unwrap();
    assert!(outputs.filter.is_none());
    assert!(!dir.path().join("raw.filtered.vcf").exists());
    assert!(dir.path().join("raw.ml.tree").is_file());
}

#[test]
fn invalid_arguments() {
    let dir = tempfile::tempdir().unwrap();
    let config = PipelineConfig::new_from_builtin().unwrap();

    let mut args = Arguments::new_for_test("a.vcf");
    args.ld = 1.5;
    assert!(matches!(
        Pipeline::new(args, config.clone(), dir.path()),
        Err(Error::CliArgError(_))
    ));

    let mut args = Arguments::new_for_test("a.vcf");
    args.max_percent = -1.0;
    assert!(Pipeline::new(args, config.clone(), dir.path()).is_err());

    let mut args = Arguments::new_for_test("a.vcf");
    args.prefix = "no/such/dir/run".into();
    assert!(Pipeline::new(args, config.clone(), dir.path()).is_err());

    let mut args = Arguments::new_for_test("a.vcf");
    args.input.hapmap = Some("b.txt".into());
    assert!(Pipeline::new(args, config.clone(), dir.path()).is_err());

    let mut args = Arguments::new_for_test("a.vcf");
    args.prefix = "sub/run".into();
    std::fs::create_dir(dir.path().join("sub")).unwrap();
    assert!(Pipeline::new(args, config, dir.path()).is_ok());
}

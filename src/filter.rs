use std::path::{Path, PathBuf};

use crate::{
    config::PipelineConfig,
    input::{self, GenotypeFile, InputFormat},
    tools::{self, ToolRunner},
};

pub type Result<T> = std::result::Result<T, Error>;

#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error(transparent)]
    Tool(#[from] tools::Error),
    #[error(transparent)]
    Input(#[from] input::Error),
    #[error(
        "too few records remain after filtering {file:?}: {nlines} lines, at least {min_lines} required; \
         consider relaxing -c/-p"
    )]
    InsufficientRecords {
        file: PathBuf,
        nlines: usize,
        min_lines: usize,
    },
    #[error("{0} input has no filtering step")]
    Unsupported(InputFormat),
    #[error("filtered output {0:?} would overwrite the input file; choose another -P prefix")]
    OutputIsInput(PathBuf),
}

#[derive(Debug, Clone, Copy)]
pub struct FilterParams {
    /// minimum depth of coverage (VCF only)
    pub min_depth: u32,
    /// maximum percent of low coverage / no genotype samples
    pub max_percent: f64,
}

#[derive(Debug)]
pub struct FilterReport {
    pub filtered: GenotypeFile,
    pub lines_before: usize,
    pub lines_after: usize,
}

impl FilterReport {
    pub fn removed(&self) -> usize {
        self.lines_before.saturating_sub(self.lines_after)
    }
}

pub fn filtered_path(workdir: &Path, prefix: &str, format: InputFormat) -> PathBuf {
    let ext = match format {
        InputFormat::Vcf => "vcf",
        InputFormat::HapMap => "hapmap",
        InputFormat::Gds => "gds",
    };
    workdir.join(format!("{prefix}.filtered.{ext}"))
}

/// True if `output` names the same file as the existing file `input`.
/// `output` need not exist; its directory is resolved instead.
fn is_same_file(input: &Path, output: &Path) -> bool {
    let Ok(input) = input.canonicalize() else {
        return false;
    };
    if let Ok(output) = output.canonicalize() {
        return input == output;
    }
    match (output.parent(), output.file_name()) {
        (Some(dir), Some(name)) => {
            let dir = if dir.as_os_str().is_empty() {
                Path::new(".")
            } else {
                dir
            };
            dir.canonicalize()
                .map(|d| d.join(name) == input)
                .unwrap_or(false)
        }
        _ => false,
    }
}

/// Remove low quality records from a text genotype file with the external
/// filter for its format, and check enough records survive.
pub fn remove_low_quality_data(
    input: &GenotypeFile,
    params: FilterParams,
    config: &PipelineConfig,
    workdir: &Path,
    prefix: &str,
) -> Result<FilterReport> {
    let lines_before = match input.nlines {
        Some(n) => n,
        None => input::count_lines(&input.path)?,
    };
    let output = filtered_path(workdir, prefix, input.format);
    if is_same_file(&input.path, &output) {
        return Err(Error::OutputIsInput(output));
    }

    let runner = match input.format {
        InputFormat::Vcf => {
            let runner = ToolRunner::new("VCF filter", &config.tools.vcf_filter, workdir);
            log::info!(
                "removing VCF records with depth < {} in more than {}% of samples",
                params.min_depth,
                params.max_percent
            );
            runner.run_to_file(
                [
                    input.path.clone().into_os_string(),
                    params.min_depth.to_string().into(),
                    params.max_percent.to_string().into(),
                ],
                &output,
            )?;
            runner
        }
        InputFormat::HapMap => {
            let runner = ToolRunner::new("HapMap filter", &config.tools.hapmap_filter, workdir);
            log::info!(
                "removing HapMap records without genotype in more than {}% of samples",
                params.max_percent
            );
            runner.run_to_file(
                [
                    input.path.clone().into_os_string(),
                    params.max_percent.to_string().into(),
                ],
                &output,
            )?;
            runner
        }
        InputFormat::Gds => return Err(Error::Unsupported(InputFormat::Gds)),
    };
    runner.expect_output(&output)?;

    let filtered = match GenotypeFile::open(input.format, &output, config.min_input_lines) {
        Ok(f) => f,
        Err(input::Error::TooFewLines {
            file,
            nlines,
            min_lines,
            ..
        }) => {
            return Err(Error::InsufficientRecords {
                file,
                nlines,
                min_lines,
            })
        }
        Err(input::Error::Empty { file, .. }) => {
            return Err(Error::InsufficientRecords {
                file,
                nlines: 0,
                min_lines: config.min_input_lines,
            })
        }
        Err(e) => return Err(e.into()),
    };
    let lines_after = filtered.nlines.unwrap_or_default();

    let report = FilterReport {
        filtered,
        lines_before,
        lines_after,
    };
    log::info!(
        "{} of {} lines removed; {} lines kept in {}",
        report.removed(),
        report.lines_before,
        report.lines_after,
        report.filtered.path.display()
    );
    Ok(report)
}

#[cfg(all(test, unix))]
fn test_config(dir: &Path, filter_body: &str, min_lines: usize) -> PipelineConfig {
    let script = tools::write_script(dir, "filter.sh", filter_body);
    let mut config = PipelineConfig::new_from_builtin().unwrap();
    config.min_input_lines = min_lines;
    config.tools.vcf_filter = tools::script_spec(&script);
    config.tools.hapmap_filter = tools::script_spec(&script);
    config
}

#[cfg(unix)]
#[test]
fn vcf_filter_reports_removed_lines() {
    let dir = tempfile::tempdir().unwrap();
    // drop every line containing "low"
    let config = test_config(
        dir.path(),
        r#"[ "$2" = 5 ] && [ "$3" = 5 ] || exit 9
grep -v low "$1""#,
        3,
    );
    let vcf = dir.path().join("in.vcf");
    std::fs::write(&vcf, "#h\nok1\nlow1\nok2\nlow2\nok3\n").unwrap();
    let input = GenotypeFile::open(InputFormat::Vcf, &vcf, 3).unwrap();
    let params = FilterParams {
        min_depth: 5,
        max_percent: 5.0,
    };

    let report = remove_low_quality_data(&input, params, &config, dir.path(), "run").unwrap();
    assert_eq!(report.lines_before, 6);
    assert_eq!(report.lines_after, 4);
    assert_eq!(report.removed(), 2);
    assert_eq!(report.filtered.path, dir.path().join("run.filtered.vcf"));
    assert_eq!(report.filtered.format, InputFormat::Vcf);
}

#[cfg(unix)]
#[test]
fn hapmap_filter_gets_percent_only() {
    let dir = tempfile::tempdir().unwrap();
    let config = test_config(
        dir.path(),
        r#"[ "$#" = 2 ] && [ "$2" = 12.5 ] || exit 9
cat "$1""#,
        2,
    );
    let hmp = dir.path().join("in.hmp.txt");
    std::fs::write(&hmp, "rs#\tA\nsnp1\tA/G\n").unwrap();
    let input = GenotypeFile::open(InputFormat::HapMap, &hmp, 2).unwrap();
    let params = FilterParams {
        min_depth: 5,
        max_percent: 12.5,
    };
    let report = remove_low_quality_data(&input, params, &config, dir.path(), "run").unwrap();
    assert_eq!(report.removed(), 0);
    assert_eq!(report.filtered.path, dir.path().join("run.filtered.hapmap"));
}

#[cfg(unix)]
#[test]
fn too_few_records_after_filtering() {
    let dir = tempfile::tempdir().unwrap();
    let config = test_config(dir.path(), "head -n 1 \"$1\"", 3);
    let vcf = dir.path().join("in.vcf");
    std::fs::write(&vcf, "a\nb\nc\nd\n").unwrap();
    let input = GenotypeFile::open(InputFormat::Vcf, &vcf, 3).unwrap();
    let params = FilterParams {
        min_depth: 5,
        max_percent: 5.0,
    };
    match remove_low_quality_data(&input, params, &config, dir.path(), "run") {
        Err(Error::InsufficientRecords {
            nlines, min_lines, ..
        }) => {
            assert_eq!(nlines, 1);
            assert_eq!(min_lines, 3);
        }
        x => panic!("unexpected result: {x:?}"),
    }
}

#[cfg(unix)]
#[test]
fn filter_failure_propagates() {
    let dir = tempfile::tempdir().unwrap();
    let config = test_config(dir.path(), "exit 1", 1);
    let vcf = dir.path().join("in.vcf");
    std::fs::write(&vcf, "a\n").unwrap();
    let input = GenotypeFile::open(InputFormat::Vcf, &vcf, 1).unwrap();
    let params = FilterParams {
        min_depth: 5,
        max_percent: 5.0,
    };
    assert!(matches!(
        remove_low_quality_data(&input, params, &config, dir.path(), "run"),
        Err(Error::Tool(tools::Error::Failed { .. }))
    ));
}

#[cfg(unix)]
#[test]
fn filter_refuses_to_overwrite_its_input() {
    let dir = tempfile::tempdir().unwrap();
    let config = test_config(dir.path(), r#"cat "$1""#, 1);
    let vcf = dir.path().join("run.filtered.vcf");
    std::fs::write(&vcf, "#h\nsnp1\nsnp2\n").unwrap();
    let input = GenotypeFile::open(InputFormat::Vcf, &vcf, 1).unwrap();
    let params = FilterParams {
        min_depth: 5,
        max_percent: 5.0,
    };
    assert!(matches!(
        remove_low_quality_data(&input, params, &config, dir.path(), "run"),
        Err(Error::OutputIsInput(_))
    ));
    assert_eq!(std::fs::read_to_string(&vcf).unwrap(), "#h\nsnp1\nsnp2\n");

    // same file reached through a different spelling of the path
    let sub = dir.path().join("sub");
    std::fs::create_dir(&sub).unwrap();
    let indirect = GenotypeFile::open(InputFormat::Vcf, sub.join("../run.filtered.vcf"), 1).unwrap();
    assert!(matches!(
        remove_low_quality_data(&indirect, params, &config, dir.path(), "run"),
        Err(Error::OutputIsInput(_))
    ));
    assert_eq!(std::fs::read_to_string(&vcf).unwrap(), "#h\nsnp1\nsnp2\n");
}

#[test]
fn same_file_detection() {
    let dir = tempfile::tempdir().unwrap();
    let a = dir.path().join("a.vcf");
    std::fs::write(&a, "x\n").unwrap();
    assert!(is_same_file(&a, &a));
    assert!(is_same_file(&a, &dir.path().join(".").join("a.vcf")));
    assert!(!is_same_file(&a, &dir.path().join("b.vcf")));
    assert!(!is_same_file(&dir.path().join("missing.vcf"), &a));
}

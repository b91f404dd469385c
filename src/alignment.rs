use std::{
    ffi::OsStr,
    fs::File,
    io::{BufRead, BufReader},
    path::{Path, PathBuf},
};

use crate::{
    config::PipelineConfig,
    tools::{self, ToolRunner},
};

/// width of the name field in a PHYLIP alignment
pub const PHYLIP_NAME_WIDTH: usize = 10;

pub type Result<T> = std::result::Result<T, Error>;

#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error(transparent)]
    Tool(#[from] tools::Error),
    #[error("io error, source {source:?}, file: {file:?}")]
    Io {
        source: std::io::Error,
        file: PathBuf,
    },
    #[error("malformed PHYLIP header in {file:?}: {line:?}")]
    BadHeader { file: PathBuf, line: String },
    #[error("{file:?} declares {expected} sequences but has only {found}")]
    Truncated {
        file: PathBuf,
        expected: usize,
        found: usize,
    },
    #[error("the outgroup sample {name:?} is not found in {file:?}")]
    OutgroupNotFound { name: String, file: PathBuf },
}

pub fn phylip_path(workdir: &Path, prefix: &str) -> PathBuf {
    workdir.join(format!("{prefix}.phylip.txt"))
}

/// Align SNP sequences with the external aligner, writing an interleaved
/// PHYLIP file.
pub fn align_sequences(
    fasta: &Path,
    config: &PipelineConfig,
    workdir: &Path,
    prefix: &str,
) -> Result<PathBuf> {
    let runner = ToolRunner::new("aligner", &config.tools.aligner, workdir);
    let phylip = phylip_path(workdir, prefix);
    log::info!("aligning {}", fasta.display());
    runner.run([
        OsStr::new("-phyi"),
        OsStr::new("-in"),
        fasta.as_os_str(),
        OsStr::new("-out"),
        phylip.as_os_str(),
    ])?;
    runner.expect_output(&phylip)?;
    log::info!("alignment written to {}", phylip.display());
    Ok(phylip)
}

/// Does a PHYLIP name field refer to `sample`? Names longer than the field
/// are truncated by the aligner, so they match on their first ten chars.
fn name_matches(field: &str, sample: &str) -> bool {
    if field == sample {
        return true;
    }
    sample.chars().count() > PHYLIP_NAME_WIDTH
        && sample.chars().take(PHYLIP_NAME_WIDTH).eq(field.chars())
}

/// 1-based position of `sample` among the sequences of a PHYLIP alignment,
/// as expected by PHYLIP's outgroup option.
pub fn find_outgroup_index<P: AsRef<Path>>(phylip: P, sample: &str) -> Result<usize> {
    let p = phylip.as_ref();
    let to_err = |source| Error::Io {
        source,
        file: p.to_owned(),
    };
    let reader = File::open(p).map(BufReader::new).map_err(to_err)?;
    let mut lines = reader.lines();

    let header = lines.next().transpose().map_err(to_err)?.unwrap_or_default();
    let ntaxa: usize = header
        .split_whitespace()
        .next()
        .and_then(|x| x.parse().ok())
        .ok_or_else(|| Error::BadHeader {
            file: p.to_owned(),
            line: header.clone(),
        })?;

    let mut found = 0usize;
    for line in lines {
        if found == ntaxa {
            break;
        }
        let line = line.map_err(to_err)?;
        if line.trim().is_empty() {
            continue;
        }
        found += 1;
        let field: String = line.chars().take(PHYLIP_NAME_WIDTH).collect();
        if name_matches(field.trim(), sample) {
            return Ok(found);
        }
    }

    if found < ntaxa {
        return Err(Error::Truncated {
            file: p.to_owned(),
            expected: ntaxa,
            found,
        });
    }
    Err(Error::OutgroupNotFound {
        name: sample.to_owned(),
        file: p.to_owned(),
    })
}

#[cfg(test)]
const PHYLIP: &str = " 3 12
ACC_001   ACGTACGTAC
LongSampleACGTACGTAC
ref       ACGTACGTAC

          GT
          GT
          GT
";

#[test]
fn outgroup_lookup() {
    let dir = tempfile::tempdir().unwrap();
    let p = dir.path().join("a.phylip.txt");
    std::fs::write(&p, PHYLIP).unwrap();
    assert_eq!(find_outgroup_index(&p, "ACC_001").unwrap(), 1);
    assert_eq!(find_outgroup_index(&p, "LongSampleName_42").unwrap(), 2);
    assert_eq!(find_outgroup_index(&p, "ref").unwrap(), 3);
    match find_outgroup_index(&p, "missing") {
        Err(Error::OutgroupNotFound { name, .. }) => assert_eq!(name, "missing"),
        x => panic!("unexpected result: {x:?}"),
    }
    // sequence blocks are not names
    assert!(find_outgroup_index(&p, "GT").is_err());
}

#[test]
fn outgroup_lookup_bad_input() {
    let dir = tempfile::tempdir().unwrap();
    let p = dir.path().join("a.phylip.txt");
    std::fs::write(&p, "ACGT\n").unwrap();
    assert!(matches!(
        find_outgroup_index(&p, "x"),
        Err(Error::BadHeader { .. })
    ));
    std::fs::write(&p, " 4 10\nA         ACGT\n").unwrap();
    assert!(matches!(
        find_outgroup_index(&p, "x"),
        Err(Error::Truncated {
            expected: 4,
            found: 1,
            ..
        })
    ));
}

#[cfg(unix)]
#[test]
fn aligner_invocation() {
    let dir = tempfile::tempdir().unwrap();
    let script = tools::write_script(
        dir.path(),
        "muscle.sh",
        r#"[ "$1" = -phyi ] && [ "$2" = -in ] && [ "$4" = -out ] || exit 9
cp "$3" "$5""#,
    );
    let mut config = PipelineConfig::new_from_builtin().unwrap();
    config.tools.aligner = tools::script_spec(&script);
    let fasta = dir.path().join("run.fasta");
    std::fs::write(&fasta, ">a\nAC\n").unwrap();

    let phylip = align_sequences(&fasta, &config, dir.path(), "run").unwrap();
    assert_eq!(phylip, dir.path().join("run.phylip.txt"));
    assert_eq!(std::fs::read_to_string(phylip).unwrap(), ">a\nAC\n");
}

#[cfg(unix)]
#[test]
fn failing_aligner_is_an_error() {
    let dir = tempfile::tempdir().unwrap();
    let script = tools::write_script(dir.path(), "muscle.sh", "cp \"$3\" \"$5\"\nexit 1");
    let mut config = PipelineConfig::new_from_builtin().unwrap();
    config.tools.aligner = tools::script_spec(&script);
    let fasta = dir.path().join("run.fasta");
    std::fs::write(&fasta, ">a\nAC\n").unwrap();

    match align_sequences(&fasta, &config, dir.path(), "run") {
        Err(Error::Tool(tools::Error::Failed { name, status, .. })) => {
            assert_eq!(name, "aligner");
            assert_eq!(status.code(), Some(1));
        }
        x => panic!("unexpected result: {x:?}"),
    }
}

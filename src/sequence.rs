use bio::io::fasta;
use std::{
    ffi::OsString,
    fs::File,
    path::{Path, PathBuf},
};

use crate::{
    config::PipelineConfig,
    input::GenotypeFile,
    tools::{self, ToolRunner},
};

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
    #[error("no sequence record found in {0:?}")]
    NoSequence(PathBuf),
    #[error(
        "the generated sequence is {len} bp long, outside of [{min}, {max}]; \
         adjust the -l/-m/-M thresholds"
    )]
    SequenceLength { len: usize, min: usize, max: usize },
}

#[derive(Debug, Clone, Copy)]
pub struct SequenceParams {
    pub ld: f64,
    pub maf: f64,
    pub missing: f64,
    pub num_chr: u32,
}

#[derive(Debug)]
pub struct SnpSequences {
    pub fasta: PathBuf,
    /// length of the first sequence; all records share it
    pub seq_len: usize,
}

pub fn fasta_path(workdir: &Path, prefix: &str) -> PathBuf {
    workdir.join(format!("{prefix}.fasta"))
}

/// Length of the first record of a FASTA file, ignoring line breaks.
pub fn first_sequence_length<P: AsRef<Path>>(path: P) -> Result<usize> {
    let p = path.as_ref();
    let to_err = |source| Error::Io {
        source,
        file: p.to_owned(),
    };
    let reader = File::open(p).map(fasta::Reader::new).map_err(to_err)?;
    match reader.records().next() {
        Some(record) => Ok(record.map_err(to_err)?.seq().len()),
        None => Err(Error::NoSequence(p.to_owned())),
    }
}

/// Convert a genotype file into one SNP sequence per sample using the
/// external sequence generator, then check the sequence length.
pub fn generate_snp_sequences(
    genotype: &GenotypeFile,
    params: SequenceParams,
    config: &PipelineConfig,
    workdir: &Path,
    prefix: &str,
) -> Result<SnpSequences> {
    let runner = ToolRunner::new(
        "sequence generator",
        &config.tools.sequence_generator,
        workdir,
    );
    log::info!(
        "generating SNP sequences from {} (LD: {}, MAF: {}, missing rate: {})",
        genotype.path.display(),
        params.ld,
        params.maf,
        params.missing
    );
    runner.run([
        OsString::from(genotype.format.mode_name()),
        genotype.path.clone().into_os_string(),
        params.ld.to_string().into(),
        params.maf.to_string().into(),
        params.missing.to_string().into(),
        params.num_chr.to_string().into(),
        prefix.into(),
    ])?;

    let fasta = fasta_path(workdir, prefix);
    runner.expect_output(&fasta)?;

    let seq_len = first_sequence_length(&fasta)?;
    if seq_len < config.min_seq_len || seq_len > config.max_seq_len {
        return Err(Error::SequenceLength {
            len: seq_len,
            min: config.min_seq_len,
            max: config.max_seq_len,
        });
    }
    log::info!("{} bp SNP sequences written to {}", seq_len, fasta.display());

    Ok(SnpSequences { fasta, seq_len })
}

#[test]
fn first_sequence_length_spans_lines() {
    let dir = tempfile::tempdir().unwrap();
    let fa = dir.path().join("a.fasta");
    std::fs::write(&fa, ">s1\nACGT\nAC\n>s2\nACGTAC\n").unwrap();
    assert_eq!(first_sequence_length(&fa).unwrap(), 6);
    std::fs::write(&fa, ">s1\nACGTACGTAC").unwrap();
    assert_eq!(first_sequence_length(&fa).unwrap(), 10);
    std::fs::write(&fa, ">s1\r\nACG\r\n").unwrap();
    assert_eq!(first_sequence_length(&fa).unwrap(), 3);
    std::fs::write(&fa, "").unwrap();
    assert!(matches!(
        first_sequence_length(&fa),
        Err(Error::NoSequence(_))
    ));
    // sequence data without a header line
    std::fs::write(&fa, "ACGT\n").unwrap();
    assert!(matches!(
        first_sequence_length(&fa),
        Err(Error::Io { .. })
    ));
}

#[cfg(all(test, unix))]
fn run_generator(seq_len: usize) -> Result<SnpSequences> {
    use crate::input::InputFormat;

    let dir = tempfile::tempdir().unwrap();
    let body = format!(
        r#"[ "$1" = vcf ] && [ "$3" = 0.1 ] && [ "$6" = 0 ] || exit 9
printf '>s1\n%s\n>s2\n%s\n' {seq} {seq} > "$7.fasta""#,
        seq = "A".repeat(seq_len)
    );
    let script = tools::write_script(dir.path(), "gen.sh", &body);
    let mut config = PipelineConfig::new_from_builtin().unwrap();
    config.tools.sequence_generator = tools::script_spec(&script);

    let vcf = dir.path().join("in.vcf");
    std::fs::write(&vcf, "x\n").unwrap();
    let genotype = GenotypeFile::open(InputFormat::Vcf, &vcf, 1).unwrap();
    let params = SequenceParams {
        ld: 0.1,
        maf: 0.1,
        missing: 0.1,
        num_chr: 0,
    };
    generate_snp_sequences(&genotype, params, &config, dir.path(), "run")
}

#[cfg(unix)]
#[test]
fn sequence_length_bounds() {
    assert_eq!(run_generator(500).unwrap().seq_len, 500);
    assert_eq!(run_generator(50000).unwrap().seq_len, 50000);
    assert!(matches!(
        run_generator(499),
        Err(Error::SequenceLength { len: 499, .. })
    ));
    assert!(matches!(
        run_generator(50001),
        Err(Error::SequenceLength { len: 50001, .. })
    ));
}

#[cfg(unix)]
#[test]
fn generator_without_output_is_an_error() {
    use crate::input::InputFormat;

    let dir = tempfile::tempdir().unwrap();
    let script = tools::write_script(dir.path(), "gen.sh", "exit 0");
    let mut config = PipelineConfig::new_from_builtin().unwrap();
    config.tools.sequence_generator = tools::script_spec(&script);
    let gds = dir.path().join("in.gds");
    std::fs::write(&gds, [1u8]).unwrap();
    let genotype = GenotypeFile::open(InputFormat::Gds, &gds, 1).unwrap();
    let params = SequenceParams {
        ld: 0.1,
        maf: 0.1,
        missing: 0.1,
        num_chr: 0,
    };
    assert!(matches!(
        generate_snp_sequences(&genotype, params, &config, dir.path(), "run"),
        Err(Error::Tool(tools::Error::MissingOutput { .. }))
    ));
}

#[cfg(unix)]
#[test]
fn failing_generator_stops_the_stage() {
    use crate::input::InputFormat;

    let dir = tempfile::tempdir().unwrap();
    // writes a usable FASTA but still reports failure
    let body = format!(
        r#"printf '>s1\n%s\n' {} > "$7.fasta"
exit 1"#,
        "A".repeat(600)
    );
    let script = tools::write_script(dir.path(), "gen.sh", &body);
    let mut config = PipelineConfig::new_from_builtin().unwrap();
    config.tools.sequence_generator = tools::script_spec(&script);
    let vcf = dir.path().join("in.vcf");
    std::fs::write(&vcf, "x\n").unwrap();
    let genotype = GenotypeFile::open(InputFormat::Vcf, &vcf, 1).unwrap();
    let params = SequenceParams {
        ld: 0.1,
        maf: 0.1,
        missing: 0.1,
        num_chr: 0,
    };
    match generate_snp_sequences(&genotype, params, &config, dir.path(), "run") {
        Err(Error::Tool(tools::Error::Failed { status, .. })) => {
            assert_eq!(status.code(), Some(1))
        }
        x => panic!("unexpected result: {x:?}"),
    }
}

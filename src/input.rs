use std::{
    fs::File,
    io::{BufRead, BufReader},
    path::{Path, PathBuf},
};

pub type Result<T> = std::result::Result<T, Error>;

#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("io error, source {source:?}, file: {file:?}")]
    Io {
        source: std::io::Error,
        file: PathBuf,
    },
    #[error("{format} file does not exist: {file:?}")]
    NotFound { format: InputFormat, file: PathBuf },
    #[error("{format} file is empty: {file:?}")]
    Empty { format: InputFormat, file: PathBuf },
    #[error(
        "{format} file {file:?} has {nlines} lines, but at least {min_lines} lines are required"
    )]
    TooFewLines {
        format: InputFormat,
        file: PathBuf,
        nlines: usize,
        min_lines: usize,
    },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InputFormat {
    Vcf,
    HapMap,
    Gds,
}

impl InputFormat {
    /// name passed to the sequence generator to select its reader
    pub fn mode_name(&self) -> &'static str {
        match self {
            InputFormat::Vcf => "vcf",
            InputFormat::HapMap => "hapmap",
            InputFormat::Gds => "gds",
        }
    }

    /// GDS is binary; only text formats are line counted
    pub fn is_text(&self) -> bool {
        !matches!(self, InputFormat::Gds)
    }
}

impl std::fmt::Display for InputFormat {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            InputFormat::Vcf => "VCF",
            InputFormat::HapMap => "HapMap",
            InputFormat::Gds => "GDS",
        };
        f.write_str(s)
    }
}

/// Count newline-terminated lines. A trailing line without a newline
/// counts as a line too.
pub fn count_lines<P: AsRef<Path>>(path: P) -> Result<usize> {
    let p = path.as_ref();
    let to_err = |source| Error::Io {
        source,
        file: p.to_owned(),
    };
    let mut reader = File::open(p).map(BufReader::new).map_err(to_err)?;
    let mut nlines = 0usize;
    let mut last_byte = b'\n';
    loop {
        let buf = reader.fill_buf().map_err(to_err)?;
        if buf.is_empty() {
            break;
        }
        nlines += buf.iter().filter(|b| **b == b'\n').count();
        last_byte = buf[buf.len() - 1];
        let n = buf.len();
        reader.consume(n);
    }
    if last_byte != b'\n' {
        nlines += 1;
    }
    Ok(nlines)
}

/// A genotype file that passed existence and size checks.
#[derive(Debug, Clone)]
pub struct GenotypeFile {
    pub format: InputFormat,
    pub path: PathBuf,
    /// line count for text formats, `None` for GDS
    pub nlines: Option<usize>,
}

impl GenotypeFile {
    pub fn open<P: AsRef<Path>>(format: InputFormat, path: P, min_lines: usize) -> Result<Self> {
        let path = path.as_ref().to_owned();
        let meta = match std::fs::metadata(&path) {
            Ok(m) if m.is_file() => m,
            Ok(_) => return Err(Error::NotFound { format, file: path }),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                return Err(Error::NotFound { format, file: path })
            }
            Err(source) => return Err(Error::Io { source, file: path }),
        };
        if meta.len() == 0 {
            return Err(Error::Empty { format, file: path });
        }

        let nlines = if format.is_text() {
            let nlines = count_lines(&path)?;
            if nlines < min_lines {
                return Err(Error::TooFewLines {
                    format,
                    file: path,
                    nlines,
                    min_lines,
                });
            }
            Some(nlines)
        } else {
            None
        };

        Ok(Self {
            format,
            path,
            nlines,
        })
    }
}

#[test]
fn count_lines_handles_trailing_newline() {
    let dir = tempfile::tempdir().unwrap();
    let a = dir.path().join("a.txt");
    std::fs::write(&a, "x\ny\nz\n").unwrap();
    assert_eq!(count_lines(&a).unwrap(), 3);
    std::fs::write(&a, "x\ny\nz").unwrap();
    assert_eq!(count_lines(&a).unwrap(), 3);
    std::fs::write(&a, "").unwrap();
    assert_eq!(count_lines(&a).unwrap(), 0);
}

#[test]
fn count_lines_larger_than_buffer() {
    let dir = tempfile::tempdir().unwrap();
    let a = dir.path().join("big.txt");
    let line = "chr1\t100\tA\tG\t0/1\t1/1\n";
    std::fs::write(&a, line.repeat(20_000)).unwrap();
    assert_eq!(count_lines(&a).unwrap(), 20_000);
}

#[test]
fn open_rejects_missing_and_small_files() {
    let dir = tempfile::tempdir().unwrap();
    let missing = dir.path().join("missing.vcf");
    assert!(matches!(
        GenotypeFile::open(InputFormat::Vcf, &missing, 10),
        Err(Error::NotFound { .. })
    ));

    let empty = dir.path().join("empty.vcf");
    std::fs::write(&empty, "").unwrap();
    assert!(matches!(
        GenotypeFile::open(InputFormat::Vcf, &empty, 10),
        Err(Error::Empty { .. })
    ));

    let small = dir.path().join("small.hmp.txt");
    std::fs::write(&small, "rs#\talleles\nsnp1\tA/G\n").unwrap();
    match GenotypeFile::open(InputFormat::HapMap, &small, 10) {
        Err(Error::TooFewLines {
            nlines, min_lines, ..
        }) => {
            assert_eq!(nlines, 2);
            assert_eq!(min_lines, 10);
        }
        x => panic!("unexpected result: {x:?}"),
    }

    assert!(matches!(
        GenotypeFile::open(InputFormat::Vcf, dir.path(), 10),
        Err(Error::NotFound { .. })
    ));
}

#[test]
fn open_accepts_files_at_threshold() {
    let dir = tempfile::tempdir().unwrap();
    let vcf = dir.path().join("ok.vcf");
    std::fs::write(&vcf, "line\n".repeat(50_000)).unwrap();
    let g = GenotypeFile::open(InputFormat::Vcf, &vcf, 50_000).unwrap();
    assert_eq!(g.nlines, Some(50_000));

    // binary input is only checked for size
    let gds = dir.path().join("ok.gds");
    std::fs::write(&gds, [0u8, 1, 2, 3]).unwrap();
    let g = GenotypeFile::open(InputFormat::Gds, &gds, 50_000).unwrap();
    assert_eq!(g.nlines, None);
}

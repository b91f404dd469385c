use std::{
    ffi::OsString,
    path::{Path, PathBuf},
};

use crate::{
    config::PipelineConfig,
    tools::{self, ToolRunner},
};

/// fixed file names used by the tree builder in its working directory
pub const SCRATCH_INFILE: &str = "infile";
pub const SCRATCH_OUTFILE: &str = "outfile";
pub const SCRATCH_OUTTREE: &str = "outtree";

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
    #[error(
        "{0:?} exists; the tree builder would read it instead of the alignment. Remove it or run elsewhere"
    )]
    InfileExists(PathBuf),
}

#[derive(Debug, Clone)]
pub struct TreeFiles {
    /// newick tree
    pub tree: PathBuf,
    /// tree builder report
    pub report: PathBuf,
}

pub fn ml_tree_paths(workdir: &Path, prefix: &str) -> TreeFiles {
    TreeFiles {
        tree: workdir.join(format!("{prefix}.ml.tree")),
        report: workdir.join(format!("{prefix}.ml.txt")),
    }
}

pub fn bootstrap_tree_path(workdir: &Path, prefix: &str) -> PathBuf {
    workdir.join(format!("{prefix}.bs.tree"))
}

/// Menu answers for the tree builder: the alignment file name, the
/// optional outgroup selection, then `Y` to start.
pub fn control_script(phylip: &Path, outgroup_index: Option<usize>) -> String {
    let mut s = format!("{}\n", phylip.display());
    if let Some(idx) = outgroup_index {
        s.push_str(&format!("O\n{idx}\n"));
    }
    s.push_str("Y\n");
    s
}

fn rename(from: &Path, to: &Path) -> Result<()> {
    std::fs::rename(from, to).map_err(|e| Error::Io {
        source: e,
        file: from.to_owned(),
    })
}

/// Infer a maximum likelihood tree from a PHYLIP alignment and move the
/// builder's fixed-name outputs to `<prefix>.ml.tree` and `<prefix>.ml.txt`.
pub fn build_ml_tree(
    phylip: &Path,
    outgroup_index: Option<usize>,
    config: &PipelineConfig,
    workdir: &Path,
    prefix: &str,
) -> Result<TreeFiles> {
    let infile = workdir.join(SCRATCH_INFILE);
    if infile.exists() {
        return Err(Error::InfileExists(infile));
    }
    let outfile = workdir.join(SCRATCH_OUTFILE);
    let outtree = workdir.join(SCRATCH_OUTTREE);
    for stale in [&outfile, &outtree] {
        if stale.exists() {
            log::warn!("removing stale {}", stale.display());
            std::fs::remove_file(stale).map_err(|e| Error::Io {
                source: e,
                file: stale.to_path_buf(),
            })?;
        }
    }

    // the builder limits file name length, so prefer a path relative to its cwd
    let phylip_arg = phylip.strip_prefix(workdir).unwrap_or(phylip);
    let script = control_script(phylip_arg, outgroup_index);

    let runner = ToolRunner::new("tree builder", &config.tools.tree_builder, workdir);
    match outgroup_index {
        Some(idx) => log::info!("building ML tree rooted on sequence #{idx}"),
        None => log::info!("building ML tree"),
    }
    runner.run_with_stdin(Vec::<OsString>::new(), &script)?;
    runner.expect_output(&outtree)?;
    runner.expect_output(&outfile)?;

    let files = ml_tree_paths(workdir, prefix);
    rename(&outtree, &files.tree)?;
    rename(&outfile, &files.report)?;
    Ok(files)
}

/// Run the external bootstrap analysis; returns `<prefix>.bs.tree`.
pub fn build_bootstrap_tree(
    phylip: &Path,
    num_bootstrap: u32,
    outgroup: Option<&str>,
    config: &PipelineConfig,
    workdir: &Path,
    prefix: &str,
) -> Result<PathBuf> {
    let runner = ToolRunner::new("bootstrap", &config.tools.bootstrap, workdir);
    let mut args: Vec<OsString> = vec![
        phylip.as_os_str().to_owned(),
        num_bootstrap.to_string().into(),
        prefix.into(),
    ];
    if let Some(name) = outgroup {
        args.push(name.into());
    }
    log::info!("running bootstrap analysis with {num_bootstrap} replicates");
    runner.run(args)?;

    let tree = bootstrap_tree_path(workdir, prefix);
    runner.expect_output(&tree)?;
    Ok(tree)
}

#[test]
fn control_script_with_and_without_outgroup() {
    let p = Path::new("run.phylip.txt");
    assert_eq!(control_script(p, None), "run.phylip.txt\nY\n");
    assert_eq!(control_script(p, Some(4)), "run.phylip.txt\nO\n4\nY\n");
}

#[cfg(all(test, unix))]
const FAKE_DNAML: &str = r#"cat > menu.txt
echo "(a,b);" > outtree
echo "report" > outfile"#;

#[cfg(unix)]
#[test]
fn ml_tree_outputs_are_renamed() {
    let dir = tempfile::tempdir().unwrap();
    let script = tools::write_script(dir.path(), "dnaml.sh", FAKE_DNAML);
    let mut config = PipelineConfig::new_from_builtin().unwrap();
    config.tools.tree_builder = tools::script_spec(&script);
    let phylip = dir.path().join("run.phylip.txt");
    std::fs::write(&phylip, " 1 2\na         AC\n").unwrap();
    // leftovers from an earlier run
    std::fs::write(dir.path().join(SCRATCH_OUTTREE), "old").unwrap();

    let files = build_ml_tree(&phylip, Some(2), &config, dir.path(), "run").unwrap();
    assert_eq!(files.tree, dir.path().join("run.ml.tree"));
    assert_eq!(files.report, dir.path().join("run.ml.txt"));
    assert_eq!(std::fs::read_to_string(&files.tree).unwrap(), "(a,b);\n");
    assert_eq!(std::fs::read_to_string(&files.report).unwrap(), "report\n");
    assert!(!dir.path().join(SCRATCH_OUTTREE).exists());
    assert!(!dir.path().join(SCRATCH_OUTFILE).exists());
    let menu = std::fs::read_to_string(dir.path().join("menu.txt")).unwrap();
    assert_eq!(menu, "run.phylip.txt\nO\n2\nY\n");
}

#[cfg(unix)]
#[test]
fn existing_infile_is_refused() {
    let dir = tempfile::tempdir().unwrap();
    let script = tools::write_script(dir.path(), "dnaml.sh", FAKE_DNAML);
    let mut config = PipelineConfig::new_from_builtin().unwrap();
    config.tools.tree_builder = tools::script_spec(&script);
    std::fs::write(dir.path().join(SCRATCH_INFILE), "x").unwrap();
    let phylip = dir.path().join("run.phylip.txt");
    assert!(matches!(
        build_ml_tree(&phylip, None, &config, dir.path(), "run"),
        Err(Error::InfileExists(_))
    ));
}

#[cfg(unix)]
#[test]
fn tree_builder_failure_propagates() {
    let dir = tempfile::tempdir().unwrap();
    let script = tools::write_script(dir.path(), "dnaml.sh", "cat > /dev/null\nexit 2");
    let mut config = PipelineConfig::new_from_builtin().unwrap();
    config.tools.tree_builder = tools::script_spec(&script);
    let phylip = dir.path().join("run.phylip.txt");
    std::fs::write(&phylip, " 1 2\na         AC\n").unwrap();
    assert!(matches!(
        build_ml_tree(&phylip, None, &config, dir.path(), "run"),
        Err(Error::Tool(tools::Error::Failed { .. }))
    ));
    assert!(!dir.path().join("run.ml.tree").exists());
}

#[cfg(unix)]
#[test]
fn bootstrap_forwards_outgroup() {
    let dir = tempfile::tempdir().unwrap();
    let script = tools::write_script(
        dir.path(),
        "bs.sh",
        r#"[ "$2" = 20 ] && [ "$4" = ref ] || exit 9
echo "(a,b);" > "$3.bs.tree""#,
    );
    let mut config = PipelineConfig::new_from_builtin().unwrap();
    config.tools.bootstrap = tools::script_spec(&script);
    let phylip = dir.path().join("run.phylip.txt");

    let tree =
        build_bootstrap_tree(&phylip, 20, Some("ref"), &config, dir.path(), "run").unwrap();
    assert_eq!(tree, dir.path().join("run.bs.tree"));
    assert!(build_bootstrap_tree(&phylip, 20, None, &config, dir.path(), "run").is_err());
}

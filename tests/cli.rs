use std::path::Path;
use std::process::{Command, Output};

fn snphylo(dir: &Path, args: &[&str]) -> Output {
    Command::new(env!("CARGO_BIN_EXE_snphylo-rs"))
        .args(args)
        .current_dir(dir)
        .env("RUST_LOG", "error")
        .output()
        .expect("failed to run snphylo-rs")
}

fn stderr(out: &Output) -> String {
    String::from_utf8_lossy(&out.stderr).into_owned()
}

#[test]
fn missing_input_flag_exits_1_with_help() {
    let dir = tempfile::tempdir().unwrap();
    let out = snphylo(dir.path(), &[]);
    assert_eq!(out.status.code(), Some(1));
    let err = stderr(&out);
    assert_eq!(err.matches("Usage:").count(), 1, "{err}");
    assert!(!err.contains("For more information"), "{err}");
    assert!(err.contains("ERROR: the following required arguments"), "{err}");
}

#[test]
fn two_input_flags_exit_1() {
    let dir = tempfile::tempdir().unwrap();
    let out = snphylo(dir.path(), &["-v", "a.vcf", "-H", "a.txt"]);
    assert_eq!(out.status.code(), Some(1));
    let err = stderr(&out);
    assert_eq!(err.matches("Usage:").count(), 1, "{err}");
    assert!(err.contains("cannot be used with"), "{err}");
}

#[test]
fn help_exits_0() {
    let dir = tempfile::tempdir().unwrap();
    let out = snphylo(dir.path(), &["-h"]);
    assert_eq!(out.status.code(), Some(0));
    assert!(String::from_utf8_lossy(&out.stdout).contains("-P"));
}

#[test]
fn nonexistent_input_exits_1() {
    let dir = tempfile::tempdir().unwrap();
    let out = snphylo(dir.path(), &["-v", "missing.vcf"]);
    assert_eq!(out.status.code(), Some(1));
    assert!(stderr(&out).contains("does not exist"));
}

#[test]
fn undersized_input_exits_1() {
    let dir = tempfile::tempdir().unwrap();
    std::fs::write(dir.path().join("small.vcf"), "line\n".repeat(49_999)).unwrap();
    let out = snphylo(dir.path(), &["-v", "small.vcf"]);
    assert_eq!(out.status.code(), Some(1));
    let err = stderr(&out);
    assert!(err.contains("49999 lines"), "{err}");
}

#[cfg(unix)]
mod with_fake_tools {
    use super::*;

    fn tool(dir: &Path, name: &str, body: &str) -> String {
        let path = dir.join(name);
        std::fs::write(&path, format!("{body}\n")).unwrap();
        format!(
            "[tools.{}]\nprogram = \"/bin/sh\"\nargs = [{:?}]\n\n",
            name.trim_end_matches(".sh"),
            path.to_string_lossy()
        )
    }

    /// Writes stand-in tools, a config using them and a small VCF.
    fn setup(dir: &Path, dnaml_body: &str) {
        let mut config = String::from("min_input_lines = 3\nmin_seq_len = 500\nmax_seq_len = 50000\n\n");
        config += &tool(dir, "vcf_filter.sh", r#"grep -v low "$1""#);
        config += &tool(dir, "hapmap_filter.sh", r#"cat "$1""#);
        config += &tool(
            dir,
            "sequence_generator.sh",
            &format!(
                r#"printf '>ref\n%s\n>s2\n%s\n' {seq} {seq} > "$7.fasta""#,
                seq = "C".repeat(800)
            ),
        );
        config += &tool(
            dir,
            "aligner.sh",
            r#"printf ' 2 4\nref       ACGT\ns2        ACGA\n' > "$5""#,
        );
        config += &tool(dir, "tree_builder.sh", dnaml_body);
        config += &tool(dir, "bootstrap.sh", r#"echo "(ref,s2);" > "$3.bs.tree""#);
        std::fs::write(dir.join("snphylo.toml"), config).unwrap();
        std::fs::write(dir.join("in.vcf"), "#h\nsnp1\nsnp2\nsnp3 low\nsnp4\n").unwrap();
    }

    const DNAML: &str = r#"cat > /dev/null
echo "(ref,s2);" > outtree
echo "report" > outfile"#;

    #[test]
    fn successful_run_writes_two_tree_files() {
        let dir = tempfile::tempdir().unwrap();
        setup(dir.path(), DNAML);
        let out = snphylo(
            dir.path(),
            &["-v", "in.vcf", "--config", "snphylo.toml", "-P", "res", "-o", "ref"],
        );
        assert_eq!(out.status.code(), Some(0), "{}", stderr(&out));
        assert!(dir.path().join("res.ml.tree").is_file());
        assert!(dir.path().join("res.ml.txt").is_file());
        assert!(String::from_utf8_lossy(&out.stdout).contains("res.ml.tree"));
    }

    #[test]
    fn unknown_outgroup_exits_1() {
        let dir = tempfile::tempdir().unwrap();
        setup(dir.path(), DNAML);
        let out = snphylo(
            dir.path(),
            &["-v", "in.vcf", "--config", "snphylo.toml", "-o", "nobody"],
        );
        assert_eq!(out.status.code(), Some(1));
        let err = stderr(&out);
        assert!(err.contains("\"nobody\" is not found"), "{err}");
    }

    #[test]
    fn failing_tree_builder_exits_1() {
        let dir = tempfile::tempdir().unwrap();
        setup(dir.path(), "cat > /dev/null\nexit 4");
        let out = snphylo(dir.path(), &["-v", "in.vcf", "--config", "snphylo.toml"]);
        assert_eq!(out.status.code(), Some(1));
        assert!(stderr(&out).contains("tree builder failed"));
        assert!(!dir.path().join("snphylo.output.ml.tree").exists());
    }
}

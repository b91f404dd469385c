use std::path::{Path, PathBuf};

use clap::{Args, Parser};

use crate::input::InputFormat;

#[derive(Parser, Debug, Clone)]
#[command(author, version, about, long_about, name = "snphylo-rs", color=clap::ColorChoice::Always, styles=get_styles())]
pub struct Arguments {
    // ---- genotype input
    #[command(flatten)]
    pub input: InputArgs,

    // ---- filtering
    /// Minimum depth of coverage for a genotype call in a VCF file. Calls
    /// below this depth count as low coverage.
    #[arg(short = 'c', long, default_value_t = 5, help_heading = "filter option")]
    pub min_depth: u32,

    /// Maximum percent of samples with low coverage or no genotype allowed at
    /// a site. Sites above this percent are removed.
    #[arg(short = 'p', long, default_value_t = 5.0, help_heading = "filter option")]
    pub max_percent: f64,

    /// Skip the step removing low quality genotype data. The input file is
    /// handed to the sequence generator as is.
    #[arg(short = 'r', long, default_value_t = false, help_heading = "filter option")]
    pub skip_filter: bool,

    // ---- sequence generation
    /// Linkage disequilibrium threshold used for SNP pruning
    #[arg(short = 'l', long, default_value_t = 0.1, help_heading = "sequence option")]
    pub ld: f64,

    /// Minor allele frequency threshold
    #[arg(short = 'm', long, default_value_t = 0.1, help_heading = "sequence option")]
    pub maf: f64,

    /// Missing rate threshold
    #[arg(short = 'M', long, default_value_t = 0.1, help_heading = "sequence option")]
    pub missing: f64,

    /// Number of chromosomes to use. 0: all chromosomes found in the input
    #[arg(short = 'a', long, default_value_t = 0, help_heading = "sequence option")]
    pub num_chr: u32,

    // ---- tree
    /// Outgroup sample name. The tree is rooted on this sample, which must be
    /// present in the alignment.
    #[arg(short = 'o', long, help_heading = "tree option")]
    pub outgroup: Option<String>,

    /// Also perform a (non-parametric) bootstrap analysis
    #[arg(short = 'b', long, default_value_t = false, help_heading = "tree option")]
    pub bootstrap: bool,

    /// Number of bootstrap replicates
    #[arg(
        short = 'B',
        long,
        default_value_t = 100,
        requires = "bootstrap",
        help_heading = "tree option"
    )]
    pub num_bootstrap: u32,

    // ---- output
    /// Output prefix. May contain a directory, which must exist.
    #[arg(
        short = 'P',
        long,
        default_value = "snphylo.output",
        help_heading = "output option"
    )]
    pub prefix: String,

    /// Optional: TOML file with external tool commands and size thresholds.
    /// If not provided, a builtin configuration is used.
    #[arg(long, help_heading = "config option")]
    pub config: Option<PathBuf>,
}

#[derive(Args, Debug, Clone)]
#[group(required = true, multiple = false)]
pub struct InputArgs {
    /// VCF file of SNP genotypes
    #[arg(short = 'v', long, help_heading = "input data")]
    pub vcf: Option<PathBuf>,

    /// HapMap file of SNP genotypes
    #[arg(short = 'H', long, help_heading = "input data")]
    pub hapmap: Option<PathBuf>,

    /// GDS file of SNP genotypes
    #[arg(short = 'd', long, help_heading = "input data")]
    pub gds: Option<PathBuf>,
}

impl Arguments {
    /// The selected input format and file. Returns `None` only for a value
    /// built without clap, where the input group is not enforced.
    pub fn input(&self) -> Option<(InputFormat, &Path)> {
        let InputArgs { vcf, hapmap, gds } = &self.input;
        match (vcf, hapmap, gds) {
            (Some(p), None, None) => Some((InputFormat::Vcf, p.as_path())),
            (None, Some(p), None) => Some((InputFormat::HapMap, p.as_path())),
            (None, None, Some(p)) => Some((InputFormat::Gds, p.as_path())),
            _ => None,
        }
    }

    pub fn new_for_test(vcf: impl Into<PathBuf>) -> Self {
        Self {
            input: InputArgs {
                vcf: Some(vcf.into()),
                hapmap: None,
                gds: None,
            },
            min_depth: 5,
            max_percent: 5.0,
            skip_filter: false,
            ld: 0.1,
            maf: 0.1,
            missing: 0.1,
            num_chr: 0,
            outgroup: None,
            bootstrap: false,
            num_bootstrap: 100,
            prefix: "snphylo.output".into(),
            config: None,
        }
    }
}

fn ansi(color: anstyle::AnsiColor) -> anstyle::Style {
    anstyle::Style::new().fg_color(Some(anstyle::Color::Ansi(color)))
}

/// Help colors: cyan section headers, blue flags, magenta value names.
pub fn get_styles() -> clap::builder::Styles {
    use anstyle::AnsiColor::*;
    clap::builder::Styles::styled()
        .header(ansi(Cyan).bold())
        .usage(ansi(Cyan).bold())
        .literal(ansi(BrightBlue).bold())
        .placeholder(ansi(Magenta).italic())
        .valid(ansi(Green))
        .invalid(ansi(Yellow).bold())
        .error(ansi(BrightRed).bold())
}

#[test]
fn parse_vcf_with_defaults() {
    let args = Arguments::try_parse_from(["snphylo-rs", "-v", "a.vcf"]).unwrap();
    let (format, path) = args.input().unwrap();
    assert_eq!(format, InputFormat::Vcf);
    assert_eq!(path, Path::new("a.vcf"));
    assert_eq!(args.min_depth, 5);
    assert_eq!(args.max_percent, 5.0);
    assert_eq!(args.ld, 0.1);
    assert_eq!(args.maf, 0.1);
    assert_eq!(args.missing, 0.1);
    assert_eq!(args.prefix, "snphylo.output");
    assert!(args.outgroup.is_none());
}

#[test]
fn parse_all_short_flags() {
    let args = Arguments::try_parse_from([
        "snphylo-rs", "-H", "g.hmp.txt", "-c", "8", "-p", "10", "-l", "0.2", "-m", "0.05", "-M",
        "0.3", "-o", "ref1", "-P", "out/run1", "-a", "12", "-r", "-b", "-B", "50",
    ])
    .unwrap();
    assert_eq!(args.input().unwrap().0, InputFormat::HapMap);
    assert_eq!(args.min_depth, 8);
    assert_eq!(args.max_percent, 10.0);
    assert_eq!(args.ld, 0.2);
    assert_eq!(args.maf, 0.05);
    assert_eq!(args.missing, 0.3);
    assert_eq!(args.outgroup.as_deref(), Some("ref1"));
    assert_eq!(args.prefix, "out/run1");
    assert_eq!(args.num_chr, 12);
    assert!(args.skip_filter);
    assert!(args.bootstrap);
    assert_eq!(args.num_bootstrap, 50);
}

#[test]
fn exactly_one_input_is_required() {
    assert!(Arguments::try_parse_from(["snphylo-rs"]).is_err());
    assert!(Arguments::try_parse_from(["snphylo-rs", "-v", "a.vcf", "-d", "a.gds"]).is_err());
    assert!(Arguments::try_parse_from(["snphylo-rs", "-H", "a.txt", "-d", "a.gds"]).is_err());
    let args = Arguments::try_parse_from(["snphylo-rs", "-d", "a.gds"]).unwrap();
    assert_eq!(args.input().unwrap().0, InputFormat::Gds);
}

#[test]
fn bootstrap_count_requires_bootstrap_flag() {
    assert!(Arguments::try_parse_from(["snphylo-rs", "-v", "a.vcf", "-B", "10"]).is_err());
}

#[test]
fn command_definition_is_consistent() {
    use clap::CommandFactory;
    Arguments::command().debug_assert();
}

#[test]
fn help_uses_tool_colors() {
    use clap::CommandFactory;
    let help = Arguments::command().render_help();
    let colored = help.ansi().to_string();
    // cyan headers, magenta placeholders
    assert!(colored.contains("\x1b[36m"), "{colored:?}");
    assert!(colored.contains("\x1b[35m"), "{colored:?}");
    assert!(help.to_string().contains("Usage:"));
}

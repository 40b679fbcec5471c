use clap::{Parser, Subcommand, ValueEnum};
use std::path::PathBuf;

/// Object detection agent driven by a local language model
#[derive(Parser, Debug)]
#[command(
    name = "visiontool",
    about = "Object detection agent driven by a local language model",
    version,
    author,
    long_about = "visiontool asks a language model (Ollama by default) to analyze an image with \
                  a YOLOv8 object detector and summarize which objects it contains."
)]
pub struct CliArgs {
    #[command(subcommand)]
    pub command: Commands,

    #[arg(long, global = true, value_name = "LEVEL", help = "Set logging level")]
    pub log_level: Option<String>,

    #[arg(short = 'v', long, global = true, help = "Enable debug logging")]
    pub verbose: bool,

    #[arg(
        short = 'q',
        long,
        global = true,
        conflicts_with = "verbose",
        help = "Quiet mode - suppress non-error output"
    )]
    pub quiet: bool,
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    #[command(
        about = "Run the object analysis crew on an image",
        long_about = "Kicks off the crew: the agent asks the language model to call the object \
                      detection tool on the image and returns the model's final answer.\n\n\
                      Examples:\n  \
                      visiontool run street.jpg\n  \
                      visiontool run street.jpg --model ollama/qwen2.5:7b\n  \
                      visiontool run street.jpg --format json"
    )]
    Run(RunArgs),

    #[command(
        about = "Run the object detection tool directly",
        long_about = "Runs the detector on the image without involving a language model and \
                      prints the tool's report.\n\n\
                      Examples:\n  \
                      visiontool detect street.jpg\n  \
                      visiontool detect street.jpg --yolo-model yolov8s.pt"
    )]
    Detect(DetectArgs),

    #[command(
        about = "Check LLM and detector availability",
        long_about = "Checks that the configured LLM endpoint is reachable and that the \
                      detector identifier resolves to weights.\n\n\
                      Examples:\n  \
                      visiontool health\n  \
                      visiontool health --format json"
    )]
    Health(HealthArgs),
}

#[derive(Parser, Debug, Clone)]
pub struct RunArgs {
    #[arg(value_name = "IMAGE", help = "Path to the image to analyze")]
    pub image: PathBuf,

    #[arg(
        short = 'm',
        long,
        value_name = "MODEL",
        help = "LLM in provider/model form (overrides MODEL)"
    )]
    pub model: Option<String>,

    #[arg(
        long,
        value_name = "MODEL",
        help = "Detector identifier (overrides YOLO_MODEL)"
    )]
    pub yolo_model: Option<String>,

    #[arg(
        long,
        value_name = "SECONDS",
        help = "LLM request timeout in seconds (overrides VISIONTOOL_REQUEST_TIMEOUT)"
    )]
    pub timeout: Option<u64>,

    #[arg(long, help = "Disable tool result caching")]
    pub no_cache: bool,

    #[arg(
        short = 'f',
        long,
        value_enum,
        default_value = "human",
        help = "Output format"
    )]
    pub format: OutputFormatArg,
}

#[derive(Parser, Debug, Clone)]
pub struct DetectArgs {
    #[arg(value_name = "IMAGE", help = "Path to the image to analyze")]
    pub image: PathBuf,

    #[arg(
        long,
        value_name = "MODEL",
        help = "Detector identifier (overrides YOLO_MODEL)"
    )]
    pub yolo_model: Option<String>,

    #[arg(
        short = 'f',
        long,
        value_enum,
        default_value = "human",
        help = "Output format"
    )]
    pub format: OutputFormatArg,
}

#[derive(Parser, Debug, Clone)]
pub struct HealthArgs {
    #[arg(
        short = 'f',
        long,
        value_enum,
        default_value = "human",
        help = "Output format"
    )]
    pub format: OutputFormatArg,
}

#[derive(ValueEnum, Debug, Clone, Copy, PartialEq, Eq)]
pub enum OutputFormatArg {
    Json,
    Yaml,
    Human,
}

impl From<OutputFormatArg> for super::output::OutputFormat {
    fn from(arg: OutputFormatArg) -> Self {
        match arg {
            OutputFormatArg::Json => super::output::OutputFormat::Json,
            OutputFormatArg::Yaml => super::output::OutputFormat::Yaml,
            OutputFormatArg::Human => super::output::OutputFormat::Human,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::CommandFactory;

    #[test]
    fn test_cli_args_verify() {
        CliArgs::command().debug_assert();
    }

    #[test]
    fn test_run_defaults() {
        let args = CliArgs::parse_from(["visiontool", "run", "street.jpg"]);
        match args.command {
            Commands::Run(run_args) => {
                assert_eq!(run_args.image, PathBuf::from("street.jpg"));
                assert_eq!(run_args.format, OutputFormatArg::Human);
                assert!(run_args.model.is_none());
                assert!(run_args.yolo_model.is_none());
                assert!(run_args.timeout.is_none());
                assert!(!run_args.no_cache);
            }
            _ => panic!("Expected Run command"),
        }
    }

    #[test]
    fn test_run_with_overrides() {
        let args = CliArgs::parse_from([
            "visiontool",
            "run",
            "street.jpg",
            "--model",
            "ollama/qwen2.5:7b",
            "--yolo-model",
            "yolov8s.pt",
            "--timeout",
            "30",
            "--no-cache",
            "-f",
            "json",
        ]);
        match args.command {
            Commands::Run(run_args) => {
                assert_eq!(run_args.model.as_deref(), Some("ollama/qwen2.5:7b"));
                assert_eq!(run_args.yolo_model.as_deref(), Some("yolov8s.pt"));
                assert_eq!(run_args.timeout, Some(30));
                assert!(run_args.no_cache);
                assert_eq!(run_args.format, OutputFormatArg::Json);
            }
            _ => panic!("Expected Run command"),
        }
    }

    #[test]
    fn test_run_requires_image() {
        assert!(CliArgs::try_parse_from(["visiontool", "run"]).is_err());
    }

    #[test]
    fn test_detect_command() {
        let args = CliArgs::parse_from(["visiontool", "detect", "cat.png", "--format", "yaml"]);
        match args.command {
            Commands::Detect(detect_args) => {
                assert_eq!(detect_args.image, PathBuf::from("cat.png"));
                assert_eq!(detect_args.format, OutputFormatArg::Yaml);
            }
            _ => panic!("Expected Detect command"),
        }
    }

    #[test]
    fn test_global_flags() {
        let args = CliArgs::parse_from(["visiontool", "health", "--log-level", "debug"]);
        assert_eq!(args.log_level.as_deref(), Some("debug"));
        assert!(matches!(args.command, Commands::Health(_)));

        let args = CliArgs::parse_from(["visiontool", "-v", "health"]);
        assert!(args.verbose);
    }

    #[test]
    fn test_verbose_conflicts_with_quiet() {
        assert!(CliArgs::try_parse_from(["visiontool", "-v", "-q", "health"]).is_err());
    }
}

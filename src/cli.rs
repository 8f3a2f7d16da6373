use clap::Parser;
use service_supervisor::config::DEFAULT_CONFIG_PATH;
use std::path::PathBuf;

#[derive(Parser, Debug)]
#[command(name = "svsd", version)]
#[command(about = "Service supervisor - starts, stops and watches system services in dependency order")]
pub struct Cli {
    /// Config file path
    #[arg(short, long, default_value = DEFAULT_CONFIG_PATH)]
    pub config: PathBuf,

    /// Validate the configuration, print a start order and exit
    #[arg(long)]
    pub check: bool,

    /// Boot arguments: runlevel=<name>, +service, -service, hot_reload.
    /// Anything else is ignored, so the kernel command line can be passed
    /// through unchanged.
    #[arg(trailing_var_arg = true, allow_hyphen_values = true, num_args = 0..)]
    pub boot_args: Vec<String>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_boot_args_pass_through() {
        let cli = Cli::try_parse_from(["svsd", "runlevel=single", "+debug", "-sshd", "quiet"]).unwrap();
        assert_eq!(cli.config, PathBuf::from(DEFAULT_CONFIG_PATH));
        assert!(!cli.check);
        assert_eq!(cli.boot_args, vec!["runlevel=single", "+debug", "-sshd", "quiet"]);
    }

    #[test]
    fn test_check_with_config() {
        let cli = Cli::try_parse_from(["svsd", "--config", "/tmp/s.yaml", "--check"]).unwrap();
        assert!(cli.check);
        assert_eq!(cli.config, PathBuf::from("/tmp/s.yaml"));
        assert!(cli.boot_args.is_empty());
    }
}

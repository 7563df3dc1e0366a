#![allow(clippy::multiple_crate_versions)]

use clap::{Arg, ArgAction, Command};

mod commands;

const VERSION: &str = env!("CARGO_PKG_VERSION");

fn cli() -> Command {
    let config_arg = Arg::new("config")
        .short('c')
        .long("config")
        .value_name("FILE")
        .help("TOML configuration file");

    Command::new("bert-studio")
        .version(VERSION)
        .about("BERT Studio - model lifecycle and sandboxed custom tasks")
        .subcommand_required(true)
        .arg_required_else_help(true)
        .subcommand(
            Command::new("serve")
                .about("Start the REST service")
                .arg(config_arg.clone())
                .arg(
                    Arg::new("host")
                        .long("host")
                        .value_name("HOST")
                        .help("Host address to bind to"),
                )
                .arg(
                    Arg::new("port")
                        .short('p')
                        .long("port")
                        .value_name("PORT")
                        .value_parser(clap::value_parser!(u16))
                        .help("Port to bind the server to"),
                ),
        )
        .subcommand(
            Command::new("check")
                .about("Run code admission over custom-task fragment files")
                .arg(
                    Arg::new("tokenizer")
                        .long("tokenizer")
                        .value_name("FILE")
                        .required(true)
                        .help("Tokenizer fragment"),
                )
                .arg(
                    Arg::new("model")
                        .long("model")
                        .value_name("FILE")
                        .required(true)
                        .help("Model fragment"),
                )
                .arg(
                    Arg::new("function")
                        .long("function")
                        .value_name("FILE")
                        .required(true)
                        .help("Function fragment"),
                )
                .arg(
                    Arg::new("json")
                        .long("json")
                        .action(ArgAction::SetTrue)
                        .help("Print violations as JSON"),
                ),
        )
        .subcommand(
            Command::new("config")
                .about("Print the effective configuration as TOML")
                .arg(config_arg),
        )
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let matches = cli().get_matches();

    match matches.subcommand() {
        Some(("serve", sub_matches)) => commands::serve::run(sub_matches).await,
        Some(("check", sub_matches)) => {
            let admitted = commands::check::run(sub_matches)?;
            if !admitted {
                std::process::exit(1);
            }
            Ok(())
        }
        Some(("config", sub_matches)) => commands::config::run(sub_matches),
        _ => {
            println!("BERT Studio v{}", VERSION);
            println!("Use --help for available commands");
            Ok(())
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_cli_is_well_formed() {
        cli().debug_assert();
    }

    #[test]
    fn test_serve_port_must_be_numeric() {
        let result = cli().try_get_matches_from(["bert-studio", "serve", "--port", "abc"]);
        assert!(result.is_err());

        let matches = cli()
            .try_get_matches_from(["bert-studio", "serve", "--port", "9000"])
            .unwrap();
        let (_, serve) = matches.subcommand().unwrap();
        assert_eq!(serve.get_one::<u16>("port"), Some(&9000));
    }
}

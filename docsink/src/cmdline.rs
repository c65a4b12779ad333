use std::path::PathBuf;

use clap::{Arg, Command, value_parser};

pub(super) const CONFIG_ARG: &str = "config";
pub(super) const CATALOG_ARG: &str = "catalog";

pub(super) fn root_cli() -> Command {
    Command::new("docsink")
        .about("Writes the records of a sync into a document store")
        .subcommand_required(true)
        .arg_required_else_help(true)
        .subcommand(add_spec_subcommand())
        .subcommand(add_check_subcommand())
        .subcommand(add_write_subcommand())
}

fn add_spec_subcommand() -> Command {
    Command::new("spec").about("Prints the connector specification")
}

fn add_check_subcommand() -> Command {
    Command::new("check")
        .about("Checks the configured store can be reached")
        .arg(config_arg())
}

fn add_write_subcommand() -> Command {
    Command::new("write")
        .about("Writes the records read from stdin")
        .arg(config_arg())
        .arg(
            Arg::new(CATALOG_ARG)
                .long(CATALOG_ARG)
                .help("Path to the configured catalog")
                .required(true)
                .value_parser(value_parser!(PathBuf)),
        )
}

fn config_arg() -> Arg {
    Arg::new(CONFIG_ARG)
        .long(CONFIG_ARG)
        .help("Path to the destination configuration")
        .required(true)
        .value_parser(value_parser!(PathBuf))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn verify_cli() {
        root_cli().debug_assert();
    }

    #[test]
    fn test_write_requires_catalog() {
        let result = root_cli().try_get_matches_from(["docsink", "write", "--config", "c.json"]);
        assert!(result.is_err());

        let matches = root_cli()
            .try_get_matches_from([
                "docsink",
                "write",
                "--config",
                "c.json",
                "--catalog",
                "catalog.json",
            ])
            .unwrap();
        let (name, sub) = matches.subcommand().unwrap();
        assert_eq!(name, "write");
        assert_eq!(
            sub.get_one::<PathBuf>(CATALOG_ARG),
            Some(&PathBuf::from("catalog.json"))
        );
    }
}

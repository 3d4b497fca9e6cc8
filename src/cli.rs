//
// Copyright (c) 2020-2021 science+computing ag and other contributors
//
// This program and the accompanying materials are made
// available under the terms of the Eclipse Public License 2.0
// which is available at https://www.eclipse.org/legal/epl-2.0/
//
// SPDX-License-Identifier: EPL-2.0
//

use clap::crate_authors;
use clap::crate_version;
use clap::Arg;
use clap::Command;

pub fn cli() -> Command {
    Command::new("ordino")
        .author(crate_authors!())
        .version(crate_version!())
        .about("Processing-job orchestration core for scientific data platforms")
        .subcommand_required(true)
        .arg_required_else_help(true)
        .arg(
            Arg::new("config")
                .required(false)
                .short('c')
                .long("config")
                .value_name("PATH")
                .global(true)
                .help("Path to the configuration file (default: $ORDINO_CONFIG_FP)"),
        )
        .subcommand(
            Command::new("watcher")
                .about("Run the scheduler watcher and log every observed state change"),
        )
        .subcommand(
            Command::new("check-allocation")
                .about("Validate a resource-allocation template without touching the store")
                .arg(
                    Arg::new("template")
                        .required(true)
                        .index(1)
                        .help("The template, e.g. \"--time {samples}*60 --mem 16G\""),
                ),
        )
        .subcommand(
            Command::new("completions")
                .about("Generate and print shell completions")
                .arg(
                    Arg::new("shell")
                        .required(true)
                        .index(1)
                        .value_parser(clap::value_parser!(clap_complete::Shell)),
                ),
        )
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn verify_cli() {
        cli().debug_assert();
    }

    #[test]
    fn check_allocation_takes_one_template() {
        let matches = cli()
            .try_get_matches_from(["ordino", "check-allocation", "--time {samples}*60"])
            .unwrap();
        let (name, sub) = matches.subcommand().unwrap();
        assert_eq!(name, "check-allocation");
        assert_eq!(
            sub.get_one::<String>("template").map(String::as_str),
            Some("--time {samples}*60")
        );
    }
}

use clap::Parser;
use colored::Colorize;

fn main() {
	let cli = taxator::Cli::parse();
	env_logger::Builder::new()
		.filter_level(cli.log_level())
		.parse_default_env()
		.init();

	if let Err(err) = taxator::run(cli) {
		eprintln!("{} {}", "Error:".red().bold(), err);
		std::process::exit(1);
	}
}

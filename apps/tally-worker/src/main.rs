use clap::Parser;

#[tokio::main]
async fn main() -> color_eyre::Result<()> {
	color_eyre::install()?;

	let args = tally_worker::Args::parse();

	tally_worker::run(args).await
}

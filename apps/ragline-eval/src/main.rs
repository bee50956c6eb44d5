use clap::Parser;

use ragline_eval::Args;

#[tokio::main]
async fn main() -> color_eyre::Result<()> {
	color_eyre::install()?;

	let args = Args::parse();

	ragline_eval::run(args).await
}

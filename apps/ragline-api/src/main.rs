use clap::Parser;

#[tokio::main]
async fn main() -> color_eyre::Result<()> {
	color_eyre::install()?;

	let args = ragline_api::Args::parse();

	ragline_api::run(args).await
}

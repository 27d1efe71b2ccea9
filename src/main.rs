#[cfg(all(feature = "cli", not(target_family = "wasm")))]
fn main() -> color_eyre::eyre::Result<()> {
    use clap::Parser;
    use sans::Cli;

    env_logger::builder().format_timestamp(None).init();
    color_eyre::install()?;
    let cli = Cli::parse();
    std::process::exit(cli.run())
}

#[cfg(target_family = "wasm")]
fn main() -> ! {
    panic!("Not used as a binary in wasm (but it seems cargo insists we have a `main` function).")
}

#[cfg(not(feature = "cli"))]
fn main() -> ! {
    panic!("cli feature not enabled")
}

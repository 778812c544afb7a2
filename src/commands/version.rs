pub fn run() -> anyhow::Result<()> {
    println!("orbitctl {}", env!("CARGO_PKG_VERSION"));
    Ok(())
}

fn main() -> anyhow::Result<()> {
    fanout_cli::run()
}

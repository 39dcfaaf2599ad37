fn main() -> anyhow::Result<()> {
    lifeink_lib::run()
}

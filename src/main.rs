fn main() -> anyhow::Result<()> {
    gig_finder_lib::run()
}

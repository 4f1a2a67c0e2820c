fn main() -> anyhow::Result<()> {
    tatoeba_indexer::run()
}

// Neonvoice - speech clip player
// Binary entry point

fn main() -> anyhow::Result<()> {
    neonvoice_lib::run()
}

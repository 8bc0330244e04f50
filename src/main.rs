#[tokio::main]
async fn main() {
    if let Err(e) = arena_draft_lib::run().await {
        eprintln!("arena-draft: {:#}", e);
        std::process::exit(1);
    }
}

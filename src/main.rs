#[tokio::main]
async fn main() {
    if let Err(e) = lab_interpreter::run().await {
        eprintln!("lab-interpreter failed to start: {e}");
        std::process::exit(1);
    }
}

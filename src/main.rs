fn main() -> Result<(), Box<dyn std::error::Error>> {
    chatrelay::cli::main()
}

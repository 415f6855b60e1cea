use tokio::runtime::Builder;

use gordafarid::config;
use gordafarid::server::run_server;

const DEFAULT_CONFIG_PATH: &str = "./config.toml";

fn print_usage_and_exit(arg0: &str) -> ! {
    eprintln!("Usage: {} [-config <path>]", arg0);
    std::process::exit(1);
}

fn main() {
    env_logger::init();

    let mut args: Vec<String> = std::env::args().collect();
    let arg0 = args.remove(0);
    let mut config_path = DEFAULT_CONFIG_PATH.to_string();

    while !args.is_empty() {
        let arg = args.remove(0);
        if arg == "-config" || arg == "--config" {
            if args.is_empty() {
                eprintln!("Missing config path argument.");
                print_usage_and_exit(&arg0);
            }
            config_path = args.remove(0);
        } else {
            eprintln!("Invalid argument: {}", arg);
            print_usage_and_exit(&arg0);
        }
    }

    let config = match config::load_server(&config_path) {
        Ok(c) => c,
        Err(e) => {
            eprintln!("Failed to load server config {}: {}", config_path, e);
            std::process::exit(1);
        }
    };

    let runtime = Builder::new_multi_thread()
        .enable_io()
        .enable_time()
        .build()
        .expect("Could not build tokio runtime");

    runtime.block_on(async move {
        if let Err(e) = run_server(config).await {
            eprintln!("Server error: {}", e);
            std::process::exit(1);
        }
    });
}

use clap::Parser;
use tls_connect_proxy::cli::{execute_command, Cli};
use tls_connect_proxy::server::init_local_offset;
use tracing_subscriber::EnvFilter;

fn main() {
    let cli = Cli::parse();

    // 访问日志使用本地时间，时区偏移只能在单线程时安全读取
    init_local_offset();

    // RUST_LOG 优先于 --log-level
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&cli.log_level));

    // 日志写到 stderr，stdout 留给 corkscrew 的隧道数据
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .with_target(false)
        .with_thread_ids(false)
        .with_file(false)
        .with_line_number(false)
        .init();

    let runtime = match tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()
    {
        Ok(runtime) => runtime,
        Err(e) => {
            eprintln!("Error: failed to start runtime: {}", e);
            std::process::exit(1);
        }
    };

    if let Err(e) = runtime.block_on(execute_command(&cli)) {
        eprintln!("Error: {:#}", e);
        std::process::exit(1);
    }
}

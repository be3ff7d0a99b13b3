use std::process;

use tokio::runtime::Runtime;

use asena::app_context::AppContext;

fn main() -> miette::Result<()> {
    tracing_subscriber::fmt().with_thread_ids(true).init();

    let rt = Runtime::new().expect("Failed to build Tokio runtime");

    let ctx = rt.block_on(AppContext::bootstrap())?;
    let services = ctx.build_services();

    tracing::info!("Server running (PID: {})", process::id());

    let (mut server, tasks) = ctx.ready();

    server.bootstrap();
    server.add_services(services);

    rt.spawn(async move { tasks.run().await });

    tracing::info!("Starting Asena...");
    server.run_forever();
}

//! Kernel process entry point.
//!
//! Reads requests from stdin, writes notifications to stdout, logs to
//! stderr. Exits on `Shutdown`, on EOF, or when the host side of the pipe
//! goes away.

use std::io::{BufWriter, Write};

use rill_core::ipc::{KernelNotification, KernelRequest, read_frame, write_frame};
use rill_kernel::KernelSession;

fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_writer(std::io::stderr)
        .init();

    let mut stdin = std::io::stdin().lock();
    let stdout = std::io::stdout().lock();
    let mut writer = BufWriter::new(stdout);

    let mut session = KernelSession::new()?;
    tracing::info!("kernel started");

    loop {
        let request = match read_frame::<_, KernelRequest>(&mut stdin) {
            Ok(Some(request)) => request,
            Ok(None) => {
                tracing::info!("host closed the request stream");
                break;
            }
            Err(e) => {
                tracing::error!("failed to read request: {e}");
                break;
            }
        };

        let mut pipe_broken = false;
        let mut sink = |notification: KernelNotification| {
            if pipe_broken {
                return;
            }
            if let Err(e) = write_frame(&mut writer, &notification) {
                tracing::error!("failed to write notification: {e}");
                pipe_broken = true;
            }
        };

        let keep_going = session.handle(request, &mut sink);
        if pipe_broken {
            break;
        }
        if !keep_going {
            tracing::info!("shutting down");
            break;
        }
    }

    writer.flush().ok();
    Ok(())
}

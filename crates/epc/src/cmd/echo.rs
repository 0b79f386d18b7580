use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use epc_peer::{DispatchPolicy, EndpointConfig, Registry, Server};
use epc_sexp::Value;

use crate::cmd::EchoArgs;
use crate::exit::{peer_error, CliError, CliResult, SUCCESS};
use crate::output::OutputFormat;

pub fn run(args: EchoArgs, _format: OutputFormat) -> CliResult<i32> {
    let registry = Arc::new(Registry::new());
    registry.register("echo", Some("Return the arguments unchanged."), |args| {
        Ok(Value::list(args.to_vec()))
    });

    let config = EndpointConfig {
        dispatch: if args.threaded {
            DispatchPolicy::ThreadPerCall
        } else {
            DispatchPolicy::Serial
        },
        ..EndpointConfig::default()
    };
    let server = Server::bind_with((args.bind.as_str(), args.port), registry, config)
        .map_err(|err| peer_error("bind failed", err))?;

    // The supervising process reads the port from stdout.
    server
        .print_port(&mut std::io::stdout())
        .map_err(|err| peer_error("port handshake failed", err))?;

    let running = Arc::new(AtomicBool::new(true));
    install_ctrlc_handler(Arc::clone(&running))?;

    while running.load(Ordering::SeqCst) {
        let endpoint = server
            .accept()
            .map_err(|err| peer_error("accept failed", err))?;
        endpoint
            .join()
            .map_err(|err| peer_error("session failed", err))?;
        tracing::info!(peer = endpoint.peer_addr(), "session ended");
    }

    Ok(SUCCESS)
}

fn install_ctrlc_handler(running: Arc<AtomicBool>) -> CliResult<()> {
    ctrlc::set_handler(move || {
        running.store(false, Ordering::SeqCst);
    })
    .map_err(|err| {
        CliError::new(
            crate::exit::INTERNAL,
            format!("signal handler setup failed: {err}"),
        )
    })
}

//! Minimal EPC worker — registers a couple of methods, prints its port,
//! and serves until killed.
//!
//! Run with:
//!   cargo run --example echo-server
//!
//! In another terminal (use the printed port):
//!   cargo run --features cli -- call PORT echo '55'

use std::sync::Arc;

use epc::peer::{MethodError, Registry, Server};
use epc::sexp::Value;

fn main() -> Result<(), Box<dyn std::error::Error>> {
    let registry = Arc::new(Registry::new());
    registry
        .register("echo", Some("Return the arguments unchanged."), |args| {
            Ok(Value::list(args.to_vec()))
        })
        .register("add", Some("Sum integer arguments."), |args| {
            let mut total = 0;
            for arg in args {
                total += arg
                    .as_int()
                    .ok_or_else(|| MethodError::new("add: integer expected"))?;
            }
            Ok(Value::Int(total))
        });

    let server = Server::bind(("127.0.0.1", 0), registry)?;
    server.print_port(&mut std::io::stdout())?;
    server.serve_forever()?;
    Ok(())
}

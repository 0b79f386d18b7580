use epc_peer::connect;

use crate::cmd::{parse_duration, MethodsArgs};
use crate::exit::{peer_error, CliResult, SUCCESS};
use crate::output::{print_methods, OutputFormat};

pub fn run(args: MethodsArgs, format: OutputFormat) -> CliResult<i32> {
    let timeout = parse_duration(&args.timeout)?;

    let endpoint = connect((args.host.as_str(), args.port))
        .map_err(|err| peer_error("connect failed", err))?;
    let listing = endpoint
        .methods_sync(Some(timeout))
        .map_err(|err| peer_error("methods query failed", err))?;
    endpoint.close();

    print_methods(&listing, format);
    Ok(SUCCESS)
}

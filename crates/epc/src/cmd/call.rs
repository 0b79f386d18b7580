use epc_peer::connect;
use epc_sexp::Value;

use crate::cmd::{parse_duration, CallArgs};
use crate::exit::{peer_error, CliError, CliResult, SUCCESS, USAGE};
use crate::output::{print_result, OutputFormat};

pub fn run(args: CallArgs, format: OutputFormat) -> CliResult<i32> {
    let timeout = parse_duration(&args.timeout)?;
    let call_args = parse_args(&args.args)?;

    let endpoint = connect((args.host.as_str(), args.port))
        .map_err(|err| peer_error("connect failed", err))?;
    let result = endpoint
        .call_sync(&args.method, call_args, Some(timeout))
        .map_err(|err| peer_error("call failed", err))?;
    endpoint.close();

    print_result(&args.method, &result, format);
    Ok(SUCCESS)
}

fn parse_args(raw: &[String]) -> CliResult<Vec<Value>> {
    raw.iter()
        .map(|text| {
            epc_sexp::parse(text).map_err(|err| {
                CliError::new(
                    USAGE,
                    format!("argument {text:?} is not a valid s-expression: {err}"),
                )
            })
        })
        .collect()
}

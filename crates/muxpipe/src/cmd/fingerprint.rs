use muxpipe_peer::Fingerprint;

use crate::cmd::FingerprintArgs;
use crate::exit::{CliResult, SUCCESS};
use crate::output::{print_fingerprint, OutputFormat};

pub fn run(args: FingerprintArgs, format: OutputFormat) -> CliResult<i32> {
    let fingerprint = Fingerprint::build(&args.identity.to_config());
    print_fingerprint(&fingerprint, format);
    Ok(SUCCESS)
}

use crate::cmd::VersionArgs;
use crate::exit::{CliResult, SUCCESS};

pub fn run(args: VersionArgs) -> CliResult<i32> {
    if !args.extended {
        println!("muxpipe {}", env!("CARGO_PKG_VERSION"));
        return Ok(SUCCESS);
    }

    println!("name: muxpipe");
    println!("version: {}", env!("CARGO_PKG_VERSION"));
    println!(
        "target: {}",
        option_env!("MUXPIPE_BUILD_TARGET").unwrap_or("unknown")
    );
    println!("target_os: {}", std::env::consts::OS);
    println!("target_arch: {}", std::env::consts::ARCH);
    println!(
        "features: peer={}, metrics={}, pipe-writer={}, cli=true",
        cfg!(feature = "peer"),
        cfg!(feature = "metrics"),
        cfg!(feature = "pipe-writer")
    );
    println!(
        "wire: header={} bytes, max_payload={} bytes",
        muxpipe_frame::HEADER_SIZE,
        muxpipe_frame::MAX_PAYLOAD
    );

    Ok(SUCCESS)
}

use crate::cmd::VersionArgs;
use crate::exit::{CliResult, SUCCESS};

pub fn run(args: VersionArgs) -> CliResult<i32> {
    if !args.extended {
        println!("debugport {}", env!("CARGO_PKG_VERSION"));
        return Ok(SUCCESS);
    }

    println!("name: debugport");
    println!("version: {}", env!("CARGO_PKG_VERSION"));
    println!(
        "build_target: {}",
        option_env!("DEBUGPORT_BUILD_TARGET").unwrap_or("unknown")
    );
    println!("target_os: {}", std::env::consts::OS);
    println!("target_arch: {}", std::env::consts::ARCH);
    println!(
        "wire_endian: {}",
        match debugport_frame::WIRE_ENDIAN {
            debugport_frame::Endian::Little => "little",
            debugport_frame::Endian::Big => "big",
        }
    );
    println!("max_payload: {}", debugport_frame::DEFAULT_MAX_PAYLOAD);
    println!(
        "features: router={}, big-endian={}, cli=true",
        cfg!(feature = "router"),
        cfg!(feature = "big-endian")
    );

    Ok(SUCCESS)
}

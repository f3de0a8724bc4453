//! Command-line surface.
//!
//! Exit codes: 0 on success and for `--help`; 1 for usage and build-input
//! errors. An embedding-contract violation aborts — there is no valid
//! state to continue from.

use std::ffi::OsString;
use std::path::PathBuf;

use anyhow::Context;
use clap::Parser;

use vela_vm::host::{self, HostParams};
use vela_vm::snapshot::ImageMode;

use crate::builder::{self, BuildError, BuildRequest};

const USAGE: &str = "usage: vela_snapshotter --packages=PATH --snapshot=PATH \
[--depfile=PATH --build-output=NAME] MAIN_SOURCE\n       \
vela_snapshotter --aot-vm-snapshot=PATH";

#[derive(Parser, Debug)]
#[command(name = "vela_snapshotter", about = "Builds Vela program images offline")]
struct Args {
    /// Packages map used for import resolution.
    #[arg(long, value_name = "PATH")]
    packages: Option<PathBuf>,

    /// Where to write the program image.
    #[arg(long, value_name = "PATH")]
    snapshot: Option<PathBuf>,

    /// Write a dependency file; requires --build-output.
    #[arg(long, value_name = "PATH")]
    depfile: Option<PathBuf>,

    /// Build-output name the dependency file is keyed on.
    #[arg(long, value_name = "NAME")]
    build_output: Option<String>,

    /// Write only the shared runtime image and exit.
    #[arg(long, value_name = "PATH")]
    aot_vm_snapshot: Option<PathBuf>,

    /// Entry-point source URL or path.
    #[arg(value_name = "MAIN_SOURCE")]
    main_source: Option<String>,
}

/// Parse, validate, and run one build. Returns the process exit code.
pub fn run<I, T>(args: I) -> i32
where
    I: IntoIterator<Item = T>,
    T: Into<OsString> + Clone,
{
    let args = match Args::try_parse_from(args) {
        Ok(args) => args,
        Err(err) => {
            // Help and version go to stdout and exit cleanly; everything
            // else is a usage error.
            let code = if err.use_stderr() { 1 } else { 0 };
            let _ = err.print();
            return code;
        }
    };

    let request = match validate(args) {
        Ok(request) => request,
        Err(message) => {
            eprintln!("vela_snapshotter: {message}");
            eprintln!("{USAGE}");
            return 1;
        }
    };

    let mode = ImageMode::for_build();
    ensure_host(mode);

    let outcome = builder::build(&request, mode)
        .with_context(|| format!("building {}", describe(&request)));
    match outcome {
        Ok(()) => 0,
        Err(err) => {
            if err
                .downcast_ref::<BuildError>()
                .is_some_and(BuildError::is_contract_violation)
            {
                eprintln!("vela_snapshotter: contract violation: {err:#}");
                std::process::abort();
            }
            eprintln!("vela_snapshotter: {err:#}");
            1
        }
    }
}

fn validate(args: Args) -> Result<BuildRequest, String> {
    if let Some(output) = args.aot_vm_snapshot {
        return Ok(BuildRequest::VmImage { output });
    }
    let main_source = args.main_source.ok_or("missing MAIN_SOURCE")?;
    let packages = args.packages.ok_or("missing --packages")?;
    let snapshot = args.snapshot.ok_or("missing --snapshot")?;
    let depfile = match (args.depfile, args.build_output) {
        (Some(path), Some(name)) => Some((path, name)),
        (Some(_), None) => return Err("--depfile requires --build-output".to_string()),
        (None, _) => None,
    };
    Ok(BuildRequest::App {
        main_source,
        packages,
        snapshot,
        depfile,
    })
}

fn describe(request: &BuildRequest) -> String {
    match request {
        BuildRequest::VmImage { output } => format!("VM image '{}'", output.display()),
        BuildRequest::App { snapshot, .. } => format!("snapshot '{}'", snapshot.display()),
    }
}

/// Boot the host on first use. A failure here means the embedding
/// contract is already broken; abort rather than continue.
fn ensure_host(mode: ImageMode) {
    static BOOTED: once_cell::sync::OnceCell<()> = once_cell::sync::OnceCell::new();
    BOOTED.get_or_init(|| {
        if let Err(err) = host::initialize(HostParams {
            flags: host::flags_for_mode(mode),
            ..HostParams::default()
        }) {
            eprintln!("vela_snapshotter: initializing the runtime host failed: {err}");
            std::process::abort();
        }
    });
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_validate_requires_core_flags() {
        let args = Args::try_parse_from(["vela_snapshotter", "main.vela"]).unwrap();
        let err = validate(args).unwrap_err();
        assert!(err.contains("--packages"));

        let args =
            Args::try_parse_from(["vela_snapshotter", "--packages=p", "main.vela"]).unwrap();
        let err = validate(args).unwrap_err();
        assert!(err.contains("--snapshot"));
    }

    #[test]
    fn test_validate_depfile_needs_build_output() {
        let args = Args::try_parse_from([
            "vela_snapshotter",
            "--packages=p",
            "--snapshot=s",
            "--depfile=d",
            "main.vela",
        ])
        .unwrap();
        let err = validate(args).unwrap_err();
        assert!(err.contains("--build-output"));
    }

    #[test]
    fn test_vm_image_mode_bypasses_other_requirements() {
        let args =
            Args::try_parse_from(["vela_snapshotter", "--aot-vm-snapshot=vm.img"]).unwrap();
        assert!(matches!(
            validate(args),
            Ok(BuildRequest::VmImage { .. })
        ));
    }
}

//! Main of the filesystem tools.

mod fsck;
mod mkfs;
mod mount;

use logfs::error;

fn main() {
    let (bin, mut args) = logfs::args();
    // Multi-call fallback: `logfs <tool> ...`
    let bin = if bin == "logfs" {
        args.next()
            .and_then(|s| s.into_string().ok())
            .unwrap_or_else(|| {
                error("logfs", "missing tool name");
            })
    } else {
        bin
    };
    match bin.as_str() {
        "mkfs" | "mkfs.logfs" => mkfs::main(args),
        "fsck" | "fsck.logfs" => fsck::main(args),
        "mount" | "mount.logfs" => mount::main(args),
        _ => error("logfs", "invalid binary name"),
    }
}

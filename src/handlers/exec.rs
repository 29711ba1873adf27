//! `exec`: runs a command with no shell interposed.

use std::os::unix::process::ExitStatusExt;
use std::process::Command;

use crate::codec::Writer;
use crate::envelope::get_string_arg;
use crate::error::{FatalError, HandlerError};
use crate::handlers::respond;
use crate::session::Session;

pub fn exec(session: &mut Session, id: u64, args: &[u8]) -> Result<bool, FatalError> {
    let result = do_exec(args);
    respond(session, id, result)
}

fn do_exec(args: &[u8]) -> Result<Vec<u8>, HandlerError> {
    let command = get_string_arg(args, "command")
        .ok_or_else(|| HandlerError::BadArgument("missing command argument".to_string()))?;

    let mut tokens = command.split_whitespace();
    let program = tokens
        .next()
        .ok_or_else(|| HandlerError::BadArgument("empty command".to_string()))?;

    // `Command` already gives us argv[0] == executable with no shell
    // involved, matching the no-shell tokenized-argv contract directly.
    let output = Command::new(program)
        .args(tokens)
        .output()
        .map_err(HandlerError::filesystem)?;

    let exit_code = output
        .status
        .code()
        .unwrap_or_else(|| 128 + output.status.signal().unwrap_or(0));

    let mut w = Writer::with_capacity(output.stdout.len() + output.stderr.len() + 32);
    w.map_header(3);
    w.str("stdout");
    w.bin(&output.stdout);
    w.str("stderr");
    w.bin(&output.stderr);
    w.str("exit_code");
    w.uint(exit_code as u64);
    Ok(w.into_bytes())
}

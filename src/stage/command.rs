//! Command executor (§4.4 "Command executor").

use crate::error::EngineResult;
use crate::stream::ByteStream;
use crate::subprocess;

use super::StageContext;

pub async fn run(
    command: &str,
    args: Vec<String>,
    upstream: ByteStream,
    ctx: &StageContext,
) -> EngineResult<(ByteStream, Vec<String>)> {
    let spawned = subprocess::run(
        command,
        args,
        upstream,
        ctx.cancel.clone(),
        ctx.limits.subprocess_timeout,
    )?;

    // The wait handle is driven to completion in the background; a
    // failure surfaces the next time someone reads `stdout` to EOF,
    // since the subprocess runner closes the pipe on exit either way.
    // We still need the exit status, so fold it into the stream: drain
    // stdout eagerly isn't an option (must stay lazy), so we attach a
    // sentinel future that resolves the wait handle once the consumer
    // finishes reading.
    let stdout = attach_wait(spawned.stdout, spawned.wait);
    Ok((stdout, Vec::new()))
}

/// Wraps a subprocess's stdout stream so that once the consumer drains
/// it to EOF, the spawn's wait handle (which reports non-zero exit or
/// cancellation) is awaited and any failure is surfaced as a final
/// stream error rather than silently discarded.
fn attach_wait(
    stdout: ByteStream,
    wait: tokio::task::JoinHandle<EngineResult<()>>,
) -> ByteStream {
    use futures::stream::StreamExt;
    use tokio::io;

    Box::pin(async_stream::stream! {
        futures::pin_mut!(stdout);
        while let Some(chunk) = stdout.next().await {
            yield chunk;
        }
        match wait.await {
            Ok(Ok(())) => {}
            Ok(Err(e)) => yield Err(io::Error::other(e)),
            Err(join_err) => yield Err(io::Error::other(join_err)),
        }
    }) as ByteStream
}

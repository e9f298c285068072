//! Read-buffers executor (§4.4 "Read-buffers executor") — ignores its
//! upstream and emits a JSON object of requested buffer contents.

use crate::error::EngineResult;
use crate::stream::{self, ByteStream};

use super::StageContext;

pub async fn run(
    buffers: &[String],
    upstream: ByteStream,
    ctx: &StageContext,
) -> EngineResult<(ByteStream, Vec<String>)> {
    // Consumed and discarded per §4.4; still must drain to avoid leaving
    // the prior stage's stream half-read.
    stream::drain(upstream).await?;

    let (value, unknown) = ctx.buffers.read_many(buffers);
    let warnings = unknown
        .into_iter()
        .map(|name| format!("read_buffers: unknown buffer {name:?}"))
        .collect();

    Ok((stream::once(value.to_string().into_bytes()), warnings))
}

//! Codec contracts between transports and endpoints.
//!
//! Transports own wire formats; endpoints own behaviour. These traits are
//! the boundary: a server-side transport decodes its wire request into the
//! endpoint's request type and encodes the response back, a client-side
//! transport does the inverse. No wire implementation lives in this crate.

use crate::context::Context;
use crate::endpoint::Endpoint;
use crate::error::Result;

/// Server side: wire request to endpoint request.
pub trait DecodeRequest<Wire, Req>: Send + Sync {
    fn decode(&self, ctx: &Context, wire: Wire) -> Result<Req>;
}

/// Server side: endpoint response to wire response.
pub trait EncodeResponse<Res, Wire>: Send + Sync {
    fn encode(&self, ctx: &Context, res: Res) -> Result<Wire>;
}

/// Client side: endpoint request to wire request.
pub trait EncodeRequest<Req, Wire>: Send + Sync {
    fn encode(&self, ctx: &Context, req: Req) -> Result<Wire>;
}

/// Client side: wire response to endpoint response.
pub trait DecodeResponse<Wire, Res>: Send + Sync {
    fn decode(&self, ctx: &Context, wire: Wire) -> Result<Res>;
}

/// Runs one server-side call: decode, invoke, encode.
///
/// Decode and encode failures short-circuit with the codec's error; the
/// endpoint is not invoked when decoding fails.
pub async fn serve_call<WireIn, WireOut, Req, Res>(
    ctx: Context,
    endpoint: &Endpoint<Req, Res>,
    decoder: &dyn DecodeRequest<WireIn, Req>,
    encoder: &dyn EncodeResponse<Res, WireOut>,
    wire: WireIn,
) -> Result<WireOut>
where
    Req: Send + 'static,
    Res: Send + 'static,
{
    let req = decoder.decode(&ctx, wire)?;
    let res = endpoint.call(ctx.clone(), req).await?;
    encoder.encode(&ctx, res)
}

//! One-shot offer/answer exchange
//!
//! Each side sends exactly one description and receives exactly one. Local
//! descriptions are read back after being applied so they carry every
//! gathered candidate.

use super::framing::{recv_description, send_description};
use super::protocol::{SdpType, SessionDescription};
use crate::carrier::PacketCarrier;
use crate::engine::PeerSession;
use crate::{Error, Result};
use std::future::Future;
use std::net::SocketAddr;
use std::time::Duration;
use tokio::io::{AsyncRead, AsyncWrite};
use tracing::debug;

/// Run one exchange under the handshake timeout
///
/// Every failure comes back as `HandshakeFailed` so adapters can store it as
/// their terminal state.
pub(crate) async fn within_handshake_limit<F, T>(timeout: Option<Duration>, exchange: F) -> Result<T>
where
    F: Future<Output = Result<T>>,
{
    let result = match timeout {
        Some(limit) => match tokio::time::timeout(limit, exchange).await {
            Ok(result) => result,
            Err(_) => {
                return Err(Error::HandshakeFailed(format!(
                    "timed out after {}ms",
                    limit.as_millis()
                )))
            }
        },
        None => exchange.await,
    };

    result.map_err(|e| match e {
        Error::HandshakeFailed(_) => e,
        other => Error::HandshakeFailed(other.to_string()),
    })
}

async fn apply_local(
    session: &dyn PeerSession,
    desc: SessionDescription,
) -> Result<SessionDescription> {
    session.set_local_description(desc).await?;
    session.local_description().await.ok_or_else(|| {
        Error::SdpError("local description missing after it was applied".to_string())
    })
}

/// Dial side over a stream carrier: send the offer, apply the answer
pub async fn offer_over_stream<C>(
    session: &dyn PeerSession,
    carrier: &mut C,
    limit: usize,
) -> Result<()>
where
    C: AsyncRead + AsyncWrite + Unpin + ?Sized,
{
    let offer = session.create_offer().await?;
    let offer = apply_local(session, offer).await?;
    send_description(carrier, &offer, limit).await?;
    debug!(session = %session.id(), "offer sent");

    let answer = recv_description(carrier, limit)
        .await?
        .expect(SdpType::Answer)?;
    session.set_remote_description(answer).await?;
    debug!(session = %session.id(), "answer applied");
    Ok(())
}

/// Listen side over a stream carrier: apply the offer, send the answer
pub async fn answer_over_stream<C>(
    session: &dyn PeerSession,
    carrier: &mut C,
    limit: usize,
) -> Result<()>
where
    C: AsyncRead + AsyncWrite + Unpin + ?Sized,
{
    let offer = recv_description(carrier, limit)
        .await?
        .expect(SdpType::Offer)?;
    session.set_remote_description(offer).await?;
    debug!(session = %session.id(), "offer applied");

    let answer = session.create_answer().await?;
    let answer = apply_local(session, answer).await?;
    send_description(carrier, &answer, limit).await?;
    debug!(session = %session.id(), "answer sent");
    Ok(())
}

/// Dial side over a packet carrier
///
/// The offer goes to `remote` in one datagram. Datagrams from any other
/// sender are skipped while waiting for the answer.
pub async fn offer_over_packets<P>(
    session: &dyn PeerSession,
    carrier: &P,
    remote: SocketAddr,
    limit: usize,
) -> Result<()>
where
    P: PacketCarrier + ?Sized,
{
    let offer = session.create_offer().await?;
    let offer = apply_local(session, offer).await?;
    let payload = offer.to_json()?;
    if payload.len() > limit {
        return Err(Error::FrameTooLarge {
            size: payload.len(),
            limit,
        });
    }
    carrier.send_to(&payload, remote).await?;
    debug!(session = %session.id(), %remote, "offer datagram sent");

    let mut buf = vec![0u8; limit];
    loop {
        let (n, from) = carrier.recv_from(&mut buf).await?;
        if from != remote {
            debug!(session = %session.id(), %from, "ignoring datagram from unexpected sender");
            continue;
        }

        let answer = SessionDescription::from_json(&buf[..n])?.expect(SdpType::Answer)?;
        session.set_remote_description(answer).await?;
        debug!(session = %session.id(), "answer applied");
        return Ok(());
    }
}

/// Accept side over a packet carrier
///
/// Waits for the first offer datagram from anyone and answers its sender,
/// whose address is returned. Datagrams that are not an offer are skipped.
pub async fn answer_over_packets<P>(
    session: &dyn PeerSession,
    carrier: &P,
    limit: usize,
) -> Result<SocketAddr>
where
    P: PacketCarrier + ?Sized,
{
    let mut buf = vec![0u8; limit];
    let (offer, from) = loop {
        let (n, from) = carrier.recv_from(&mut buf).await?;
        match SessionDescription::from_json(&buf[..n]).and_then(|d| d.expect(SdpType::Offer)) {
            Ok(offer) => break (offer, from),
            Err(e) => {
                debug!(
                    session = %session.id(),
                    %from,
                    error = %e,
                    "ignoring datagram that is not an offer"
                );
            }
        }
    };

    session.set_remote_description(offer).await?;
    debug!(session = %session.id(), %from, "offer datagram applied");

    let answer = session.create_answer().await?;
    let answer = apply_local(session, answer).await?;
    carrier.send_to(&answer.to_json()?, from).await?;
    debug!(session = %session.id(), %from, "answer datagram sent");
    Ok(from)
}

use bytes::Bytes;
use futures_util::StreamExt as _;
use futures_util::stream::BoxStream;
use std::pin::Pin;
use std::task::{Context, Poll};

use super::meter::{Exchange, UsageMeter};
use crate::usage::SseUsageTracker;

type UpstreamBody = BoxStream<'static, Result<Bytes, reqwest::Error>>;

/// Relays upstream SSE bytes untouched while feeding a copy to the usage
/// tracker. Usage is billed once, when upstream signals end of stream.
///
/// If the caller goes away first, the rest of the upstream stream is drained
/// in the background so the exchange is still billed.
pub(super) struct MeteredStream {
    inner: Option<UpstreamBody>,
    tracker: Option<SseUsageTracker>,
    meter: Option<UsageMeter>,
    exchange: Exchange,
}

impl MeteredStream {
    pub(super) fn new(inner: UpstreamBody, tracker: SseUsageTracker, meter: UsageMeter) -> Self {
        Self {
            inner: Some(inner),
            tracker: Some(tracker),
            meter: Some(meter),
            exchange: Exchange::default(),
        }
    }

    fn on_chunk(&mut self, bytes: &Bytes) {
        if self.exchange.ttfb_ms.is_none()
            && let Some(meter) = self.meter.as_ref()
        {
            self.exchange.ttfb_ms = Some(meter.started.elapsed().as_millis() as u64);
        }
        self.exchange.response_bytes += bytes.len() as u64;
        if let Some(tracker) = self.tracker.as_mut() {
            tracker.push(bytes);
        }
    }

    fn finalize(&mut self) {
        let (Some(mut tracker), Some(meter)) = (self.tracker.take(), self.meter.take()) else {
            return;
        };
        self.inner = None;
        let exchange = self.exchange;
        let Some(usage) = tracker.finish() else {
            report_missing_usage(&tracker, &meter, exchange);
            return;
        };
        tokio::spawn(async move {
            if let Err(e) = meter.track(usage, exchange).await {
                tracing::error!(
                    model = %meter.model.id,
                    provider = %meter.provider_id,
                    err = ?e,
                    "usage tracking failed after stream"
                );
            }
        });
    }

    fn abandon(&mut self, err: &reqwest::Error) {
        let meter = self.meter.take();
        self.tracker = None;
        self.inner = None;
        tracing::warn!(
            model = meter.as_ref().map(|m| m.model.id.as_str()).unwrap_or("-"),
            provider = meter.as_ref().map(|m| m.provider_id.as_str()).unwrap_or("-"),
            response_bytes = self.exchange.response_bytes,
            err = %err,
            "upstream stream failed; not billed"
        );
    }
}

fn report_missing_usage(tracker: &SseUsageTracker, meter: &UsageMeter, exchange: Exchange) {
    if tracker.overflowed() {
        tracing::error!(
            model = %meter.model.id,
            provider = %meter.provider_id,
            response_bytes = exchange.response_bytes,
            "stream usage lost to an oversized event; not billed"
        );
    } else {
        tracing::debug!(
            model = %meter.model.id,
            provider = %meter.provider_id,
            response_bytes = exchange.response_bytes,
            "stream finished without usage"
        );
    }
}

impl futures_util::Stream for MeteredStream {
    type Item = Result<Bytes, std::io::Error>;

    fn poll_next(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        let Some(inner) = self.inner.as_mut() else {
            return Poll::Ready(None);
        };
        match inner.poll_next_unpin(cx) {
            Poll::Ready(Some(Ok(bytes))) => {
                self.on_chunk(&bytes);
                Poll::Ready(Some(Ok(bytes)))
            }
            Poll::Ready(Some(Err(e))) => {
                self.abandon(&e);
                Poll::Ready(Some(Err(std::io::Error::other(e))))
            }
            Poll::Ready(None) => {
                self.finalize();
                Poll::Ready(None)
            }
            Poll::Pending => Poll::Pending,
        }
    }
}

impl Drop for MeteredStream {
    fn drop(&mut self) {
        let (Some(mut inner), Some(mut tracker), Some(meter)) =
            (self.inner.take(), self.tracker.take(), self.meter.take())
        else {
            return;
        };
        let Ok(handle) = tokio::runtime::Handle::try_current() else {
            return;
        };
        let exchange = self.exchange;
        tracing::debug!(
            model = %meter.model.id,
            provider = %meter.provider_id,
            "caller left mid-stream; draining upstream"
        );
        handle.spawn(async move {
            while let Some(chunk) = inner.next().await {
                match chunk {
                    Ok(bytes) => tracker.push(&bytes),
                    Err(e) => {
                        tracing::warn!(err = %e, "upstream stream failed while draining; not billed");
                        return;
                    }
                }
            }
            let Some(usage) = tracker.finish() else {
                report_missing_usage(&tracker, &meter, exchange);
                return;
            };
            if let Err(e) = meter.track(usage, exchange).await {
                tracing::error!(err = ?e, "usage tracking failed after drained stream");
            }
        });
    }
}

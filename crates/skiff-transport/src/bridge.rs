use std::marker::PhantomData;
use std::net::SocketAddr;
use std::sync::Arc;

use serde::de::DeserializeOwned;
use serde::Serialize;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::{broadcast, mpsc, Mutex};
use tracing::{debug, info, warn};

use skiff_core::CoreError;

/// Frames larger than this are treated as protocol corruption.
const MAX_FRAME: u32 = 64 * 1024 * 1024;

async fn write_frame<T: Serialize>(stream: &mut (impl AsyncWriteExt + Unpin), msg: &T) -> Result<(), CoreError> {
    let bytes = bincode::serialize(msg)?;
    let len = u32::try_from(bytes.len())
        .map_err(|_| CoreError::Transport("frame too large".into()))?;
    stream.write_all(&len.to_le_bytes()).await?;
    stream.write_all(&bytes).await?;
    stream.flush().await?;
    Ok(())
}

async fn read_frame<T: DeserializeOwned>(stream: &mut (impl AsyncReadExt + Unpin)) -> Result<T, CoreError> {
    let mut len_buf = [0u8; 4];
    stream.read_exact(&mut len_buf).await?;
    let len = u32::from_le_bytes(len_buf);
    if len > MAX_FRAME {
        return Err(CoreError::Transport(format!("oversized frame ({len} bytes)")));
    }
    let mut buf = vec![0u8; len as usize];
    stream.read_exact(&mut buf).await?;
    Ok(bincode::deserialize(&buf)?)
}

/// The agent end of the client transport: an ordered, framed byte stream.
/// The agent listens; the client-side manager connects, submits tasks and
/// control frames, and receives state updates. Nothing here assumes more
/// than ordering, so the medium behind the client side is opaque.
pub struct Bridge<In, Out> {
    addr: SocketAddr,
    in_rx: Arc<Mutex<mpsc::Receiver<In>>>,
    out_tx: broadcast::Sender<Out>,
}

impl<In, Out> Bridge<In, Out>
where
    In: DeserializeOwned + Send + 'static,
    Out: Serialize + Clone + Send + Sync + 'static,
{
    pub async fn listen(addr: &str) -> Result<Self, CoreError> {
        let listener = TcpListener::bind(addr)
            .await
            .map_err(|e| CoreError::Transport(format!("bind {addr}: {e}")))?;
        let addr = listener.local_addr()?;
        info!(%addr, "bridge listening");

        let (in_tx, in_rx) = mpsc::channel::<In>(1024);
        let (out_tx, _) = broadcast::channel::<Out>(1024);
        let out_for_conns = out_tx.clone();

        tokio::spawn(async move {
            loop {
                let (stream, peer) = match listener.accept().await {
                    Ok(x) => x,
                    Err(e) => {
                        warn!("bridge accept failed: {e}");
                        continue;
                    }
                };
                debug!(%peer, "bridge peer connected");
                let in_tx = in_tx.clone();
                let out_rx = out_for_conns.subscribe();
                tokio::spawn(handle_peer(stream, in_tx, out_rx));
            }
        });

        Ok(Self {
            addr,
            in_rx: Arc::new(Mutex::new(in_rx)),
            out_tx,
        })
    }

    pub fn local_addr(&self) -> SocketAddr {
        self.addr
    }

    /// Next inbound frame from any connected peer.
    pub async fn recv(&self) -> Option<In> {
        self.in_rx.lock().await.recv().await
    }

    /// Push a frame to every connected peer. With no peer connected the
    /// frame is dropped; the update sink layers retries on top.
    pub fn send(&self, msg: Out) -> Result<(), CoreError> {
        self.out_tx
            .send(msg)
            .map(|_| ())
            .map_err(|_| CoreError::Transport("no bridge peer connected".into()))
    }
}

async fn handle_peer<In, Out>(
    stream: TcpStream,
    in_tx: mpsc::Sender<In>,
    mut out_rx: broadcast::Receiver<Out>,
) where
    In: DeserializeOwned + Send + 'static,
    Out: Serialize + Clone + Send + Sync + 'static,
{
    let (mut read_half, mut write_half) = stream.into_split();

    let reader = tokio::spawn(async move {
        loop {
            match read_frame::<In>(&mut read_half).await {
                Ok(frame) => {
                    if in_tx.send(frame).await.is_err() {
                        break;
                    }
                }
                Err(e) => {
                    debug!("bridge read ended: {e}");
                    break;
                }
            }
        }
    });

    loop {
        match out_rx.recv().await {
            Ok(msg) => {
                if let Err(e) = write_frame(&mut write_half, &msg).await {
                    debug!("bridge write ended: {e}");
                    break;
                }
            }
            Err(broadcast::error::RecvError::Lagged(n)) => {
                warn!(skipped = n, "bridge peer lagged");
            }
            Err(broadcast::error::RecvError::Closed) => break,
        }
    }
    reader.abort();
}

/// The connecting end, used by the client-side manager and by tests.
pub struct BridgeClient<Out, In> {
    stream: TcpStream,
    _marker: PhantomData<(Out, In)>,
}

impl<Out, In> BridgeClient<Out, In>
where
    Out: Serialize,
    In: DeserializeOwned,
{
    pub async fn connect(addr: SocketAddr) -> Result<Self, CoreError> {
        let stream = TcpStream::connect(addr)
            .await
            .map_err(|e| CoreError::Transport(format!("connect {addr}: {e}")))?;
        Ok(Self {
            stream,
            _marker: PhantomData,
        })
    }

    /// Connect with exponential backoff, for agents that come up before
    /// their peer listens.
    pub async fn connect_with_retry(addr: SocketAddr, policy: crate::retry::Backoff) -> Result<Self, CoreError> {
        crate::retry::with_backoff(policy, "bridge connect", || Self::connect(addr)).await
    }

    pub async fn send(&mut self, msg: &Out) -> Result<(), CoreError> {
        write_frame(&mut self.stream, msg).await
    }

    pub async fn recv(&mut self) -> Result<In, CoreError> {
        read_frame(&mut self.stream).await
    }
}

use std::sync::Arc;

use tokio::net::TcpListener as TokioTcpListener;
use tracing::{debug, warn};

use gate_core::address::Address;
use gate_core::gate::Gate;

use crate::channel::{TcpChannel, TcpSocketConfig};

/// 服务端 accept 循环：绑定 `local`，然后反复接受连接，把每条接受到的流包装成
/// [`TcpChannel`]，登记进 `gate` 的 [`gate_core::hub::Hub`]（`adopt_passive`），
/// 再立即 `fetch_porter` 把它绑成一个 porter。
///
/// 这是这个 crate 里唯一天然需要挂起等待的操作,所以单独给它一个异步函数,不和
/// 协作式节拍争用线程；accept 到的连接一旦注册完毕,后续读写完全走 `Gate` 自己
/// 的节拍循环。
pub async fn serve_accept_loop(
    gate: Arc<Gate>,
    local: Address,
    config: TcpSocketConfig,
) -> std::io::Result<()> {
    let listener = TokioTcpListener::bind(std::net::SocketAddr::from(local)).await?;

    loop {
        let (stream, remote) = match listener.accept().await {
            Ok(pair) => pair,
            Err(err) => {
                warn!(error = %err, "tcp accept failed");
                continue;
            }
        };

        let remote_addr = Address::from(remote);
        let local_addr = stream.local_addr().map(Address::from).unwrap_or(local);

        let channel = match TcpChannel::from_accepted(stream, &config) {
            Ok(channel) => channel,
            Err(err) => {
                warn!(peer = %remote_addr, error = %err, "failed to adopt accepted tcp stream");
                continue;
            }
        };

        gate.hub()
            .adopt_passive(remote_addr, Some(local_addr), Arc::new(channel));

        if let Err(err) = gate.fetch_porter(remote_addr, Some(local_addr)) {
            warn!(peer = %remote_addr, error = %err, "failed to bind porter for accepted connection");
            continue;
        }

        debug!(peer = %remote_addr, local = %local_addr, "accepted tcp connection");
    }
}

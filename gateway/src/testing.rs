use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpListener;

// MQTT 3.1.1 CONNACK：session present = 0，返回码在最后一个字节
pub const CONNACK_ACCEPTED: [u8; 4] = [0x20, 0x02, 0x00, 0x00];
pub const CONNACK_NOT_AUTHORIZED: [u8; 4] = [0x20, 0x02, 0x00, 0x05];

/// 本地假 broker：收到 CONNECT 后回复给定的 CONNACK，之后持续读取直到对端断开
pub async fn spawn_fake_broker(connack: [u8; 4]) -> u16 {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let port = listener.local_addr().unwrap().port();

    tokio::spawn(async move {
        while let Ok((mut socket, _)) = listener.accept().await {
            tokio::spawn(async move {
                let mut buf = [0u8; 512];
                if socket.read(&mut buf).await.unwrap_or(0) == 0 {
                    return;
                }
                if socket.write_all(&connack).await.is_err() {
                    return;
                }
                while let Ok(n) = socket.read(&mut buf).await {
                    if n == 0 {
                        break;
                    }
                }
            });
        }
    });

    port
}

use once_cell::sync::OnceCell;
use reqwest::Client;
use std::time::Duration;

/// 全局复用的 HTTP Client（统一连接池/Keep-Alive），避免每次请求重复创建。
///
/// 说明：
/// - 各调用点的超时不同（路线单次 8s、GeoJSON 15s），统一在请求上用 `RequestBuilder::timeout` 设置；
/// - `Client` 本身是线程安全的，适合全局复用。
static CLIENT_DEFAULT: OnceCell<Client> = OnceCell::new();

const USER_AGENT: &str = concat!("staticmap-backend/", env!("CARGO_PKG_VERSION"));

/// 默认配置的 HTTP Client（仅设置连接超时），超时由调用点按请求设置。
pub fn client_default() -> Result<&'static Client, reqwest::Error> {
    CLIENT_DEFAULT.get_or_try_init(|| {
        Client::builder()
            .user_agent(USER_AGENT)
            .connect_timeout(Duration::from_secs(5))
            .build()
    })
}

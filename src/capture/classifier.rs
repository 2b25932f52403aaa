/// 只捕获状态码为 200 的响应
const MATCHING_STATUS: u16 = 200;

/// 判断一次交互是否属于被监控的 API
///
/// 前缀做逐字节匹配 (两端空白会被去掉), 不对结尾的 `/` 做任何归一化。
/// 空前缀会被忽略, 否则会匹配所有流量。
pub fn classify<S: AsRef<str>>(request_url: &str, response_status: u16, monitored_urls: &[S]) -> bool {
    if response_status != MATCHING_STATUS {
        return false;
    }

    monitored_urls
        .iter()
        .map(|prefix| prefix.as_ref().trim())
        .filter(|prefix| !prefix.is_empty())
        .any(|prefix| request_url.starts_with(prefix))
}

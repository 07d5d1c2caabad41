use std::net::IpAddr;

/// Anything that can name the bucket a call should be counted against when
/// the caller does not supply an explicit bucket id.
pub trait RequestKey {
    fn bucket_key(&self) -> String;
}

impl RequestKey for str {
    fn bucket_key(&self) -> String {
        self.to_string()
    }
}

impl RequestKey for String {
    fn bucket_key(&self) -> String {
        self.clone()
    }
}

impl RequestKey for IpAddr {
    fn bucket_key(&self) -> String {
        self.to_string()
    }
}

/// Transport-neutral view of an inbound request: who sent it and which route
/// class it hit.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ClientRequest {
    /// Network origin, if known.
    pub client_addr: Option<IpAddr>,
    /// Route class or policy name, e.g. `progressWrite`.
    pub route: String,
}

impl ClientRequest {
    pub fn new(client_addr: Option<IpAddr>, route: impl Into<String>) -> Self {
        Self {
            client_addr,
            route: route.into(),
        }
    }
}

impl RequestKey for ClientRequest {
    /// `<addr>|<route>`; requests with no known origin share one
    /// `anonymous` bucket per route.
    fn bucket_key(&self) -> String {
        match self.client_addr {
            Some(addr) => format!("{addr}|{}", self.route),
            None => format!("anonymous|{}", self.route),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn client_request_keys_by_addr_and_route() {
        let addr: IpAddr = "10.0.0.7".parse().unwrap();
        assert_eq!(
            ClientRequest::new(Some(addr), "progressWrite").bucket_key(),
            "10.0.0.7|progressWrite"
        );
        assert_eq!(
            ClientRequest::new(None, "progressRead").bucket_key(),
            "anonymous|progressRead"
        );
    }
}

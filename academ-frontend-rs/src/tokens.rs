/// Tags one asynchronous operation. Only the most recently issued token of a
/// [`TokenSlot`] is allowed to apply its response.
#[derive(Copy, Clone, Debug, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct RequestToken(u64);

#[derive(Clone, Debug, Default)]
pub struct TokenSlot {
    latest: u64,
}

impl TokenSlot {
    pub fn issue(&mut self) -> RequestToken {
        self.latest += 1;
        RequestToken(self.latest)
    }

    pub fn is_latest(&self, token: RequestToken) -> bool {
        token.0 == self.latest
    }

    /// Makes every token issued so far stale.
    pub fn invalidate(&mut self) {
        self.latest += 1;
    }
}

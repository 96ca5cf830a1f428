//! IMAP response model and the few parsers the relay needs.
//!
//! Only the subset of RFC 3501 used by SELECT, UID SEARCH, UID FETCH and
//! UID STORE is understood. Everything here is pure so it can be tested
//! without a socket.

/// Largest literal accepted from the server (one whole message).
pub const MAX_LITERAL_LEN: usize = 64 * 1024 * 1024;

/// Longest single response line accepted, CRLF included. A UID SEARCH
/// result over a very large folder is the longest line the relay expects.
pub const MAX_LINE_LEN: usize = 16 * 1024 * 1024;

/// One logical server response with the literals it carried.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Response {
    /// Response text with CRLFs removed. Literal payloads are not inlined;
    /// their `{n}` markers stay in place.
    pub text: String,
    pub literals: Vec<Literal>,
}

/// A literal payload and where its `{n}` marker sits in [`Response::text`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Literal {
    pub marker_at: usize,
    pub data: Vec<u8>,
}

impl Response {
    pub fn line(text: impl Into<String>) -> Self {
        Self {
            text: text.into(),
            literals: Vec::new(),
        }
    }

    fn literal_at(&self, offset: usize) -> Option<&Literal> {
        self.literals.iter().find(|l| l.marker_at == offset)
    }
}

/// Status of a tagged or untagged condition response.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Status {
    Ok,
    No,
    Bad,
    Bye,
    PreAuth,
}

/// Split `"OK [CODE] text"` into its status and the remainder.
pub fn parse_status(text: &str) -> Option<(Status, &str)> {
    let (word, rest) = text.split_once(' ').unwrap_or((text, ""));
    let status = match word.to_ascii_uppercase().as_str() {
        "OK" => Status::Ok,
        "NO" => Status::No,
        "BAD" => Status::Bad,
        "BYE" => Status::Bye,
        "PREAUTH" => Status::PreAuth,
        _ => return None,
    };
    Some((status, rest))
}

/// The bracketed response code at the start of `text`, e.g. `UIDNEXT 42`.
pub fn response_code(text: &str) -> Option<&str> {
    let inner = text.trim_start().strip_prefix('[')?;
    let end = inner.find(']')?;
    Some(&inner[..end])
}

/// Length of the literal announced at the end of a line (`... {123}`).
pub fn literal_len(line: &str) -> Option<usize> {
    let body = line.strip_suffix('}')?;
    let start = body.rfind('{')?;
    let digits = &body[start + 1..];
    if digits.is_empty() || !digits.bytes().all(|b| b.is_ascii_digit()) {
        return None;
    }
    digits.parse().ok()
}

/// Render `value` as an IMAP quoted string, or `None` if it must be sent
/// as a literal (non-ASCII or control characters).
pub fn quote(value: &str) -> Option<String> {
    if !value.bytes().all(|b| (0x20..0x7f).contains(&b)) {
        return None;
    }
    let mut out = String::with_capacity(value.len() + 2);
    out.push('"');
    for ch in value.chars() {
        if ch == '"' || ch == '\\' {
            out.push('\\');
        }
        out.push(ch);
    }
    out.push('"');
    Some(out)
}

/// Split an untagged response into its status and remainder.
fn untagged_status(text: &str) -> Option<(Status, &str)> {
    parse_status(text.strip_prefix("* ")?)
}

// ── SELECT ──────────────────────────────────────────────────────────

/// What a SELECT told us about the folder.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SelectInfo {
    pub uid_validity: Option<u32>,
    pub uid_next: Option<u32>,
    pub exists: Option<u32>,
    /// `UIDNOTSTICKY` (RFC 4315): UIDs change between sessions.
    pub uid_not_sticky: bool,
    pub read_only: bool,
}

/// Collect SELECT data from the untagged responses and the tagged OK text.
pub fn parse_select(untagged: &[Response], tagged_text: &str) -> SelectInfo {
    let mut info = SelectInfo::default();

    for response in untagged {
        let text = response.text.as_str();
        if let Some((_, rest)) = untagged_status(text) {
            if let Some(code) = response_code(rest) {
                apply_code(&mut info, code);
            }
            continue;
        }
        if let Some(rest) = text.strip_prefix("* ")
            && let Some((count, keyword)) = rest.split_once(' ')
            && keyword.eq_ignore_ascii_case("EXISTS")
        {
            info.exists = count.parse().ok();
        }
    }

    if let Some(code) = response_code(tagged_text) {
        apply_code(&mut info, code);
    }
    info
}

fn apply_code(info: &mut SelectInfo, code: &str) {
    let (name, arg) = code.split_once(' ').unwrap_or((code, ""));
    match name.to_ascii_uppercase().as_str() {
        "UIDVALIDITY" => info.uid_validity = arg.trim().parse().ok(),
        "UIDNEXT" => info.uid_next = arg.trim().parse().ok(),
        "UIDNOTSTICKY" => info.uid_not_sticky = true,
        "READ-ONLY" => info.read_only = true,
        "READ-WRITE" => info.read_only = false,
        _ => {}
    }
}

// ── SEARCH ──────────────────────────────────────────────────────────

/// Numbers from every `* SEARCH` response, in server order.
pub fn parse_search(untagged: &[Response]) -> Vec<u32> {
    let mut uids = Vec::new();
    for response in untagged {
        let Some(rest) = response.text.strip_prefix("* ") else {
            continue;
        };
        let mut words = rest.split_ascii_whitespace();
        if !words.next().is_some_and(|w| w.eq_ignore_ascii_case("SEARCH")) {
            continue;
        }
        uids.extend(words.filter_map(|w| w.parse::<u32>().ok()));
    }
    uids
}

// ── FETCH ───────────────────────────────────────────────────────────

/// The parts of a FETCH response the relay cares about.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct FetchData {
    pub uid: Option<u32>,
    /// `Some(None)` when the server answered `BODY[] NIL`.
    pub body: Option<Option<Vec<u8>>>,
}

/// Find the `BODY[]` payload for `uid` among the untagged responses.
///
/// Unrelated FETCH responses (flag updates for other messages) are ignored.
/// A lone FETCH response without a UID item is accepted as the answer.
pub fn fetch_body(untagged: &[Response], uid: u32) -> Option<Vec<u8>> {
    let fetches: Vec<FetchData> = untagged.iter().filter_map(parse_fetch).collect();

    if let Some(data) = fetches.iter().find(|f| f.uid == Some(uid) && f.body.is_some()) {
        return data.body.clone().flatten();
    }

    let anonymous: Vec<&FetchData> = fetches
        .iter()
        .filter(|f| f.uid.is_none() && f.body.is_some())
        .collect();
    match anonymous.as_slice() {
        [only] => only.body.clone().flatten(),
        _ => None,
    }
}

/// Parse `* <seq> FETCH (<items>)`.
pub fn parse_fetch(response: &Response) -> Option<FetchData> {
    let text = response.text.as_str();
    let rest = text.strip_prefix("* ")?;
    let (seq, rest) = rest.split_once(' ')?;
    seq.parse::<u32>().ok()?;
    let (keyword, rest) = rest.split_once(' ')?;
    if !keyword.eq_ignore_ascii_case("FETCH") || !rest.starts_with('(') {
        return None;
    }

    let mut scanner = Scanner {
        response,
        bytes: text.as_bytes(),
        pos: text.len() - rest.len() + 1,
    };
    let mut data = FetchData::default();

    loop {
        scanner.skip_spaces();
        match scanner.peek() {
            None | Some(b')') => break,
            Some(_) => {}
        }
        let name = scanner.item_name().to_ascii_uppercase();
        scanner.skip_spaces();
        let value = scanner.value()?;

        match name.as_str() {
            "UID" => {
                if let Value::Atom(atom) = &value {
                    data.uid = atom.parse().ok();
                }
            }
            "BODY[]" | "RFC822" => {
                data.body = Some(match value {
                    Value::Bytes(bytes) => Some(bytes),
                    _ => None,
                });
            }
            _ => {}
        }
    }
    Some(data)
}

enum Value {
    Atom(String),
    Bytes(Vec<u8>),
    Nil,
    List,
}

struct Scanner<'a> {
    response: &'a Response,
    bytes: &'a [u8],
    pos: usize,
}

impl Scanner<'_> {
    fn peek(&self) -> Option<u8> {
        self.bytes.get(self.pos).copied()
    }

    fn skip_spaces(&mut self) {
        while self.peek() == Some(b' ') {
            self.pos += 1;
        }
    }

    /// Item names may contain bracketed sections with spaces,
    /// e.g. `BODY[HEADER.FIELDS (FROM)]`.
    fn item_name(&mut self) -> String {
        let start = self.pos;
        let mut depth = 0usize;
        while let Some(b) = self.peek() {
            match b {
                b'[' => depth += 1,
                b']' => depth = depth.saturating_sub(1),
                b' ' | b')' if depth == 0 => break,
                _ => {}
            }
            self.pos += 1;
        }
        String::from_utf8_lossy(&self.bytes[start..self.pos]).into_owned()
    }

    fn value(&mut self) -> Option<Value> {
        match self.peek()? {
            b'(' => {
                self.skip_list()?;
                Some(Value::List)
            }
            b'"' => self.quoted().map(Value::Bytes),
            b'{' => {
                let marker_at = self.pos;
                let close = self.bytes[self.pos..].iter().position(|&b| b == b'}')?;
                self.pos += close + 1;
                let literal = self.response.literal_at(marker_at)?;
                Some(Value::Bytes(literal.data.clone()))
            }
            _ => {
                let start = self.pos;
                while let Some(b) = self.peek() {
                    if b == b' ' || b == b')' {
                        break;
                    }
                    self.pos += 1;
                }
                let atom = String::from_utf8_lossy(&self.bytes[start..self.pos]).into_owned();
                if atom.eq_ignore_ascii_case("NIL") {
                    Some(Value::Nil)
                } else {
                    Some(Value::Atom(atom))
                }
            }
        }
    }

    fn quoted(&mut self) -> Option<Vec<u8>> {
        self.pos += 1;
        let mut out = Vec::new();
        loop {
            let b = self.peek()?;
            self.pos += 1;
            match b {
                b'"' => return Some(out),
                b'\\' => {
                    out.push(self.peek()?);
                    self.pos += 1;
                }
                _ => out.push(b),
            }
        }
    }

    fn skip_list(&mut self) -> Option<()> {
        let mut depth = 0usize;
        loop {
            match self.peek()? {
                b'(' => {
                    depth += 1;
                    self.pos += 1;
                }
                b')' => {
                    depth -= 1;
                    self.pos += 1;
                    if depth == 0 {
                        return Some(());
                    }
                }
                b'"' => {
                    self.quoted()?;
                }
                b'{' => {
                    let close = self.bytes[self.pos..].iter().position(|&b| b == b'}')?;
                    self.pos += close + 1;
                }
                _ => self.pos += 1,
            }
        }
    }
}

use std::net::{Ipv4Addr, SocketAddrV4};

/// A request line of the bridge protocol
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Command {
    /// `conn <ip> <port>`
    Connect(SocketAddrV4),
    /// `waln <text>`
    WriteLine(String),
    /// `raln`
    ReadLine,
    /// `wbin <n>`, followed by exactly n raw bytes, n <= [MAX_BINARY_LEN]
    WriteBinary(usize),
    /// `rbin`
    ReadBinary,
    /// `vers`
    Version,
    /// `disc`
    Disconnect,
    /// `quit`
    Quit,
    /// `help` or `?`
    Help,
}

/// Longest message `wbin` accepts, which is the longest message an SRUDP transaction can carry
pub const MAX_BINARY_LEN: usize = u16::MAX as usize;

#[derive(Clone, Debug, PartialEq, Eq, thiserror::Error)]
#[error("bad syntax: {0:?}")]
pub struct SyntaxError(pub String);

impl Command {
    /// Parses a command line without its line terminator. Command words are case sensitive.
    pub fn parse(line: &str) -> Result<Command, SyntaxError> {
        let syntax_error = || SyntaxError(line.to_string());

        if let Some(args) = line.strip_prefix("conn ") {
            let mut parts = args.split(' ');
            let (Some(ip), Some(port), None) = (parts.next(), parts.next(), parts.next()) else {
                return Err(syntax_error());
            };
            let ip = Self::parse_ipv4(ip).ok_or_else(syntax_error)?;
            let port = Self::parse_decimal(port)
                .and_then(|p| u16::try_from(p).ok())
                .ok_or_else(syntax_error)?;
            return Ok(Command::Connect(SocketAddrV4::new(ip, port)));
        }
        if let Some(text) = line.strip_prefix("waln ") {
            return Ok(Command::WriteLine(text.to_string()));
        }
        if let Some(len) = line.strip_prefix("wbin ") {
            return Self::parse_decimal(len)
                .filter(|&len| len <= MAX_BINARY_LEN)
                .map(Command::WriteBinary)
                .ok_or_else(syntax_error);
        }

        match line {
            "raln" => Ok(Command::ReadLine),
            "rbin" => Ok(Command::ReadBinary),
            "vers" => Ok(Command::Version),
            "disc" => Ok(Command::Disconnect),
            "quit" => Ok(Command::Quit),
            "help" | "?" => Ok(Command::Help),
            _ => Err(syntax_error()),
        }
    }

    /// dotted quad of decimal numbers, no host names
    fn parse_ipv4(s: &str) -> Option<Ipv4Addr> {
        let mut octets = [0u8; 4];
        let mut parts = s.split('.');
        for octet in &mut octets {
            *octet = u8::try_from(Self::parse_decimal(parts.next()?)?).ok()?;
        }
        if parts.next().is_some() {
            return None;
        }
        Some(Ipv4Addr::from(octets))
    }

    /// digits only: no sign, no whitespace
    fn parse_decimal(s: &str) -> Option<usize> {
        if s.is_empty() || !s.bytes().all(|b| b.is_ascii_digit()) {
            return None;
        }
        s.parse().ok()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;

    #[rstest]
    #[case::connect("conn 192.168.0.10 5000", Command::Connect(SocketAddrV4::new(Ipv4Addr::new(192, 168, 0, 10), 5000)))]
    #[case::connect_leading_zeros("conn 010.0.0.1 08080", Command::Connect(SocketAddrV4::new(Ipv4Addr::new(10, 0, 0, 1), 8080)))]
    #[case::write_line("waln hello world", Command::WriteLine("hello world".to_string()))]
    #[case::write_empty_line("waln ", Command::WriteLine("".to_string()))]
    #[case::write_line_keeps_spaces("waln  a  b ", Command::WriteLine(" a  b ".to_string()))]
    #[case::read_line("raln", Command::ReadLine)]
    #[case::write_binary("wbin 12", Command::WriteBinary(12))]
    #[case::write_binary_zero("wbin 0", Command::WriteBinary(0))]
    #[case::write_binary_max("wbin 65535", Command::WriteBinary(MAX_BINARY_LEN))]
    #[case::read_binary("rbin", Command::ReadBinary)]
    #[case::version("vers", Command::Version)]
    #[case::disconnect("disc", Command::Disconnect)]
    #[case::quit("quit", Command::Quit)]
    #[case::help("help", Command::Help)]
    #[case::question_mark("?", Command::Help)]
    fn test_parse(#[case] line: &str, #[case] expected: Command) {
        assert_eq!(Command::parse(line), Ok(expected));
    }

    #[rstest]
    #[case::empty("")]
    #[case::unknown("foo")]
    #[case::upper_case("RALN")]
    #[case::trailing_space("raln ")]
    #[case::connect_without_args("conn")]
    #[case::connect_missing_port("conn 1.2.3.4")]
    #[case::connect_extra_arg("conn 1.2.3.4 5 6")]
    #[case::connect_host_name("conn localhost 5000")]
    #[case::connect_three_octets("conn 1.2.3 5000")]
    #[case::connect_five_octets("conn 1.2.3.4.5 5000")]
    #[case::connect_octet_too_large("conn 1.2.3.256 5000")]
    #[case::connect_empty_octet("conn 1..3.4 5000")]
    #[case::connect_port_too_large("conn 1.2.3.4 65536")]
    #[case::connect_negative_port("conn 1.2.3.4 -1")]
    #[case::connect_ipv6("conn ::1 5000")]
    #[case::write_line_without_space("waln")]
    #[case::write_binary_without_len("wbin ")]
    #[case::write_binary_not_a_number("wbin x")]
    #[case::write_binary_signed("wbin +3")]
    #[case::write_binary_two_args("wbin 3 4")]
    #[case::write_binary_too_long("wbin 65536")]
    #[case::write_binary_huge("wbin 100000000000000")]
    #[case::write_binary_beyond_usize("wbin 99999999999999999999999")]
    fn test_parse_syntax_error(#[case] line: &str) {
        assert_eq!(Command::parse(line), Err(SyntaxError(line.to_string())));
    }
}

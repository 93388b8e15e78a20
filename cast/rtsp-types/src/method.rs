use crate::parse::token;
use bytesstr::BytesStr;
use internal::IResult;
use nom::branch::alt;
use nom::bytes::complete::{tag_no_case, take_while1};
use nom::combinator::map;
use std::fmt;

/// Represents a method of the cast control protocol.
///
/// Well known methods are available as constants:
///
/// ```
/// use castlink_rtsp_types::Method;
///
/// let _setup = Method::SETUP;
///
/// // unknown methods are carried verbatim:
/// let _custom = Method::from("DESCRIBE");
/// ```
#[derive(Debug, Clone, Eq, PartialEq, Ord, PartialOrd, Hash)]
pub struct Method(Repr);

macro_rules! methods {
    ($($(#[$comments:meta])* $print:literal, $ident:ident;)+) => {

        #[derive(Debug, Clone, Eq, PartialEq, Ord, PartialOrd, Hash)]
        #[allow(clippy::upper_case_acronyms)]
        enum Repr {
            $($ident,)+
            Other(BytesStr),
        }

        impl Method {
            $(pub const $ident : Self = Self(Repr :: $ident );)+

            fn from_token(slice: &str) -> Self {
                let parsed: IResult<&str, Repr> = alt((
                   $(
                   map(tag_no_case($print), |_| Repr::$ident),
                   )*
                ))(slice);

                match parsed {
                    Ok((_, repr)) => Self(repr),
                    Err(_) => Self(Repr::Other(BytesStr::from(slice))),
                }
            }
        }

        impl fmt::Display for Method {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                match &self.0 {
                   $(Repr:: $ident => f.write_str($print),)+
                    Repr::Other(other) => f.write_str(other),
                }
            }
        }
    };
}

methods! {
    "ANNOUNCE",      ANNOUNCE;
    "OPTIONS",       OPTIONS;
    "SETUP",         SETUP;
    "PLAY",          PLAY;
    "PAUSE",         PAUSE;
    "TEARDOWN",      TEARDOWN;
    "GET_PARAMETER", GET_PARAMETER;
    "SET_PARAMETER", SET_PARAMETER;
    "RENDER_READY",  RENDER_READY;
}

impl Method {
    /// Parse a method from the leading token of `i`.
    pub fn parse(i: &str) -> IResult<&str, Self> {
        map(take_while1(token), Self::from_token)(i)
    }
}

impl From<&str> for Method {
    fn from(s: &str) -> Self {
        Self::from_token(s)
    }
}

#[cfg(test)]
mod test {
    use super::{Method, Repr};

    #[test]
    fn known_method() {
        let (rem, method) = Method::parse("SET_PARAMETER rtsp://localhost/x RTSP/1.0").unwrap();

        assert_eq!(method, Method::SET_PARAMETER);
        assert_eq!(method.to_string(), "SET_PARAMETER");
        assert!(rem.starts_with(' '));
    }

    #[test]
    fn other_method() {
        let method = Method::from("DESCRIBE");

        assert_eq!(method, Method(Repr::Other("DESCRIBE".into())));
        assert_eq!(method.to_string(), "DESCRIBE");
    }
}

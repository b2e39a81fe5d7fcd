//! The stream filter pipeline: composable encode/decode chains for the
//! standard PDF stream filters and their predictors.

mod ascii_85;
mod ascii_hex;
mod flate;
mod lzw;
mod predictor;
mod run_length;

use crate::error::{Error, Result};
use crate::object::{keys, Dict, Name, Object, Stream};
use log::warn;
use smallvec::SmallVec;

pub(crate) use predictor::PredictorParams;

/// A standard PDF stream filter.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum Filter {
    /// `/ASCIIHexDecode`
    AsciiHex,
    /// `/ASCII85Decode`
    Ascii85,
    /// `/LZWDecode`
    Lzw,
    /// `/FlateDecode`
    Flate,
    /// `/RunLengthDecode`
    RunLength,
    /// `/CCITTFaxDecode`
    CcittFax,
    /// `/JBIG2Decode`
    Jbig2,
    /// `/DCTDecode`
    Dct,
    /// `/JPXDecode`
    Jpx,
    /// `/Crypt`
    Crypt,
}

impl Filter {
    /// Resolve a filter name, accepting the short forms of the
    /// specification's appendix.
    pub fn from_name(name: &Name) -> Option<Self> {
        match name.as_bytes() {
            b"ASCIIHexDecode" | b"AHx" => Some(Filter::AsciiHex),
            b"ASCII85Decode" | b"A85" => Some(Filter::Ascii85),
            b"LZWDecode" | b"LZW" => Some(Filter::Lzw),
            b"FlateDecode" | b"Fl" => Some(Filter::Flate),
            b"RunLengthDecode" | b"RL" => Some(Filter::RunLength),
            b"CCITTFaxDecode" | b"CCF" => Some(Filter::CcittFax),
            b"JBIG2Decode" => Some(Filter::Jbig2),
            b"DCTDecode" | b"DCT" => Some(Filter::Dct),
            b"JPXDecode" => Some(Filter::Jpx),
            b"Crypt" => Some(Filter::Crypt),
            _ => {
                warn!("unknown filter: {}", name.as_str());

                None
            }
        }
    }

    /// The canonical name of the filter.
    pub fn name(&self) -> &'static str {
        match self {
            Filter::AsciiHex => "ASCIIHexDecode",
            Filter::Ascii85 => "ASCII85Decode",
            Filter::Lzw => "LZWDecode",
            Filter::Flate => "FlateDecode",
            Filter::RunLength => "RunLengthDecode",
            Filter::CcittFax => "CCITTFaxDecode",
            Filter::Jbig2 => "JBIG2Decode",
            Filter::Dct => "DCTDecode",
            Filter::Jpx => "JPXDecode",
            Filter::Crypt => "Crypt",
        }
    }

    /// Image codecs are carried opaquely: their payloads are preserved
    /// byte-for-byte instead of being transcoded.
    pub fn is_image(&self) -> bool {
        matches!(
            self,
            Filter::CcittFax | Filter::Jbig2 | Filter::Dct | Filter::Jpx
        )
    }

    fn decode(&self, data: &[u8], params: Option<&Dict>, relaxed: bool) -> Result<Vec<u8>> {
        let predictor_params = params
            .map(predictor_params_from_dict)
            .unwrap_or_default();

        match self {
            Filter::AsciiHex => ascii_hex::decode(data),
            Filter::Ascii85 => ascii_85::decode(data),
            Filter::RunLength => run_length::decode(data),
            Filter::Lzw => {
                let decoded = lzw::decode(data, predictor_params.early_change)?;
                predictor::reverse(decoded, &predictor_params)
            }
            Filter::Flate => {
                let decoded = flate::decode(data, relaxed)?;
                predictor::reverse(decoded, &predictor_params)
            }
            // The security handler drives Crypt filters; within the
            // pipeline they are the identity transform.
            Filter::Crypt => Ok(data.to_vec()),
            _ => Err(Error::Unsupported(format!(
                "decoding {} streams",
                self.name()
            ))),
        }
    }

    fn encode(&self, data: &[u8], params: Option<&Dict>) -> Result<Vec<u8>> {
        let predictor_params = params
            .map(predictor_params_from_dict)
            .unwrap_or_default();

        match self {
            Filter::AsciiHex => Ok(ascii_hex::encode(data)),
            Filter::Ascii85 => Ok(ascii_85::encode(data)),
            Filter::RunLength => Ok(run_length::encode(data)),
            Filter::Lzw => {
                let predicted = predictor::apply(data, &predictor_params)?;
                Ok(lzw::encode(&predicted, predictor_params.early_change))
            }
            Filter::Flate => {
                let predicted = predictor::apply(data, &predictor_params)?;
                Ok(flate::encode(&predicted))
            }
            Filter::Crypt => Ok(data.to_vec()),
            _ => Err(Error::Unsupported(format!(
                "encoding {} streams",
                self.name()
            ))),
        }
    }
}

fn predictor_params_from_dict(dict: &Dict) -> PredictorParams {
    let defaults = PredictorParams::default();

    PredictorParams {
        predictor: dict
            .get_int(keys::PREDICTOR)
            .and_then(|v| u8::try_from(v).ok())
            .unwrap_or(defaults.predictor),
        colors: dict
            .get_int(keys::COLORS)
            .and_then(|v| u8::try_from(v).ok())
            .unwrap_or(defaults.colors),
        bits_per_component: dict
            .get_int(b"BitsPerComponent")
            .and_then(|v| u8::try_from(v).ok())
            .unwrap_or(defaults.bits_per_component),
        columns: dict
            .get_int(keys::COLUMNS)
            .and_then(|v| usize::try_from(v).ok())
            .unwrap_or(defaults.columns),
        early_change: dict
            .get_int(keys::EARLY_CHANGE)
            .map(|e| e != 0)
            .unwrap_or(defaults.early_change),
    }
}

type ChainInner = SmallVec<[(Filter, Option<Dict>); 2]>;

/// The resolved filter chain of a stream: filters in `/Filter` order, each
/// paired with its `/DecodeParms` entry.
#[derive(Debug, Clone, Default)]
pub struct FilterChain(ChainInner);

impl FilterChain {
    /// A chain holding a single Flate stage, the default for newly written
    /// streams.
    pub fn flate() -> Self {
        let mut inner = ChainInner::new();
        inner.push((Filter::Flate, None));
        Self(inner)
    }

    /// Resolve the chain from a stream dictionary. `/Filter` may be a single
    /// name or an array; `/DecodeParms` follows suit.
    pub fn from_stream_dict(dict: &Dict) -> Result<Self> {
        let filters = match dict.get(keys::FILTER) {
            None => return Ok(Self::default()),
            Some(Object::Name(name)) => vec![name.clone()],
            Some(Object::Array(items)) => items
                .iter()
                .map(|o| {
                    o.as_name().cloned().ok_or_else(|| {
                        Error::decode("Filter", "array entry is not a name")
                    })
                })
                .collect::<Result<Vec<_>>>()?,
            Some(_) => {
                return Err(Error::decode("Filter", "entry is neither name nor array"));
            }
        };

        let parms: Vec<Option<Dict>> = match dict.get(keys::DECODE_PARMS) {
            None => vec![],
            Some(Object::Dict(d)) => vec![Some(d.clone())],
            Some(Object::Array(items)) => items
                .iter()
                .map(|o| match o {
                    Object::Dict(d) => Some(d.clone()),
                    _ => None,
                })
                .collect(),
            Some(_) => vec![],
        };

        let mut inner = ChainInner::new();
        for (i, name) in filters.iter().enumerate() {
            let filter = Filter::from_name(name)
                .ok_or_else(|| Error::Unsupported(format!("filter /{}", name.as_str())))?;
            inner.push((filter, parms.get(i).cloned().flatten()));
        }

        Ok(Self(inner))
    }

    /// Returns `true` if the chain is empty.
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// Returns `true` if any stage is an image codec.
    pub fn has_image_filter(&self) -> bool {
        self.0.iter().any(|(f, _)| f.is_image())
    }

    /// Run the decode chain in `/Filter` order.
    pub fn decode(&self, data: &[u8], relaxed: bool) -> Result<Vec<u8>> {
        let mut current = data.to_vec();

        for (filter, params) in &self.0 {
            current = filter.decode(&current, params.as_ref(), relaxed)?;
        }

        Ok(current)
    }

    /// Run the encode chain in reverse `/Filter` order, producing a payload
    /// the decode chain inverts.
    pub fn encode(&self, data: &[u8]) -> Result<Vec<u8>> {
        let mut current = data.to_vec();

        for (filter, params) in self.0.iter().rev() {
            current = filter.encode(&current, params.as_ref())?;
        }

        Ok(current)
    }

    /// The `/Filter` value describing the chain.
    pub fn filter_object(&self) -> Option<Object> {
        match self.0.len() {
            0 => None,
            1 => Some(Object::name(self.0[0].0.name().as_bytes())),
            _ => Some(Object::Array(
                self.0
                    .iter()
                    .map(|(f, _)| Object::name(f.name().as_bytes()))
                    .collect(),
            )),
        }
    }
}

/// Decode a stream's payload according to its dictionary.
pub fn decode_stream(stream: &Stream, relaxed: bool) -> Result<Vec<u8>> {
    let chain = FilterChain::from_stream_dict(&stream.dict)?;
    chain.decode(stream.raw_data(), relaxed)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn dict_with_filter(names: &[&[u8]]) -> Dict {
        let mut dict = Dict::new();
        if names.len() == 1 {
            dict.set(keys::FILTER, Object::name(names[0]));
        } else {
            dict.set(
                keys::FILTER,
                Object::Array(names.iter().map(|n| Object::name(n)).collect()),
            );
        }
        dict
    }

    #[test]
    fn chain_from_name() {
        let chain = FilterChain::from_stream_dict(&dict_with_filter(&[b"FlateDecode"])).unwrap();
        assert!(!chain.is_empty());
        assert!(!chain.has_image_filter());
    }

    #[test]
    fn chain_from_abbreviation() {
        let chain = FilterChain::from_stream_dict(&dict_with_filter(&[b"AHx"])).unwrap();
        assert_eq!(chain.decode(b"48656C6C6F>", false).unwrap(), b"Hello");
    }

    #[test]
    fn chain_rejects_unknown_filter() {
        assert!(matches!(
            FilterChain::from_stream_dict(&dict_with_filter(&[b"NoSuchFilter"])),
            Err(Error::Unsupported(_))
        ));
    }

    #[test]
    fn chained_round_trip() {
        let chain =
            FilterChain::from_stream_dict(&dict_with_filter(&[b"ASCII85Decode", b"FlateDecode"]))
                .unwrap();

        let data = b"chained filters need to invert in order";
        let encoded = chain.encode(data).unwrap();
        assert_eq!(chain.decode(&encoded, false).unwrap(), data);
    }

    #[test]
    fn image_filters_are_opaque() {
        let chain = FilterChain::from_stream_dict(&dict_with_filter(&[b"DCTDecode"])).unwrap();
        assert!(chain.has_image_filter());
        assert!(matches!(
            chain.decode(b"\xFF\xD8", false),
            Err(Error::Unsupported(_))
        ));
    }

    #[test]
    fn flate_with_png_predictor_round_trip() {
        let mut parms = Dict::new();
        parms.set(keys::PREDICTOR, Object::Integer(12));
        parms.set(keys::COLUMNS, Object::Integer(4));

        let mut dict = dict_with_filter(&[b"FlateDecode"]);
        dict.set(keys::DECODE_PARMS, Object::Dict(parms));

        let chain = FilterChain::from_stream_dict(&dict).unwrap();
        let data: Vec<u8> = (0..64u8).collect();
        let encoded = chain.encode(&data).unwrap();
        assert_eq!(chain.decode(&encoded, false).unwrap(), data);
    }

    #[test]
    fn lzw_with_tiff_predictor_round_trip() {
        let mut parms = Dict::new();
        parms.set(keys::PREDICTOR, Object::Integer(2));
        parms.set(keys::COLUMNS, Object::Integer(8));

        let mut dict = dict_with_filter(&[b"LZWDecode"]);
        dict.set(keys::DECODE_PARMS, Object::Dict(parms));

        let chain = FilterChain::from_stream_dict(&dict).unwrap();
        let data: Vec<u8> = (0..64u8).map(|i| i.wrapping_mul(3)).collect();
        let encoded = chain.encode(&data).unwrap();
        assert_eq!(chain.decode(&encoded, false).unwrap(), data);
    }
}

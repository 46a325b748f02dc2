//! Tensor-aware envelope codec.
//!
//! Frame 0 is compact JSON. Every [`Tensor`] in the value tree is replaced by
//! `{"__array__": n, "dtype": tag, "shape": [..]}` where `n` is the index of
//! the frame holding its raw little-endian bytes (frames are numbered from 0,
//! so the first tensor lives in frame 1).

use gymproxy_core::{DType, Map, RpcReply, RpcRequest, Tensor, Value};
use serde_json::{Number, Value as Json};

use crate::IpcError;

/// Placeholder key marking a tensor reference in frame 0.
pub const ARRAY_KEY: &str = "__array__";

/// Encodes a value tree into frame 0 plus one frame per tensor.
pub fn encode(value: Value) -> Result<Vec<Vec<u8>>, IpcError> {
    let mut frames = vec![Vec::new()];
    let json = to_json(value, &mut frames);
    frames[0] = serde_json::to_vec(&json).map_err(|err| IpcError::Encode(err.to_string()))?;
    Ok(frames)
}

/// Decodes frames produced by [`encode`] back into a value tree.
pub fn decode(frames: Vec<Vec<u8>>) -> Result<Value, IpcError> {
    let mut frames = frames.into_iter();
    let Some(text) = frames.next() else {
        return Err(IpcError::Malformed("message has no frames".to_string()));
    };
    let json: Json = serde_json::from_slice(&text)
        .map_err(|err| IpcError::Malformed(format!("frame 0 is not valid json: {err}")))?;

    // Slot 0 stands in for frame 0 so placeholder indices map directly.
    let mut slots: Vec<Option<Vec<u8>>> = std::iter::once(None).chain(frames.map(Some)).collect();
    from_json(json, &mut slots)
}

pub fn encode_request(request: RpcRequest) -> Result<Vec<Vec<u8>>, IpcError> {
    encode(Value::Map(Map::from([
        ("method".to_string(), Value::Str(request.method)),
        ("params".to_string(), Value::Map(request.params)),
    ])))
}

pub fn decode_request(frames: Vec<Vec<u8>>) -> Result<RpcRequest, IpcError> {
    let mut envelope = into_envelope(decode(frames)?)?;

    let method = match envelope.remove("method") {
        Some(Value::Str(method)) => method,
        Some(other) => {
            return Err(IpcError::Malformed(format!(
                "method must be a string, got {}",
                other.kind()
            )));
        }
        None => return Err(IpcError::Malformed("request has no method".to_string())),
    };
    let params = match envelope.remove("params") {
        None | Some(Value::Null) => Map::new(),
        Some(Value::Map(params)) => params,
        Some(other) => {
            return Err(IpcError::Malformed(format!(
                "params must be a mapping, got {}",
                other.kind()
            )));
        }
    };

    Ok(RpcRequest { method, params })
}

pub fn encode_reply(reply: RpcReply) -> Result<Vec<Vec<u8>>, IpcError> {
    encode(Value::Map(Map::from([
        ("result".to_string(), reply.result.map_or(Value::Null, Value::Map)),
        ("error".to_string(), reply.error.map_or(Value::Null, Value::Str)),
    ])))
}

pub fn decode_reply(frames: Vec<Vec<u8>>) -> Result<RpcReply, IpcError> {
    let mut envelope = into_envelope(decode(frames)?)?;

    let result = match envelope.remove("result") {
        None | Some(Value::Null) => None,
        Some(Value::Map(result)) => Some(result),
        Some(other) => {
            return Err(IpcError::Malformed(format!(
                "result must be a mapping or null, got {}",
                other.kind()
            )));
        }
    };
    let error = match envelope.remove("error") {
        None | Some(Value::Null) => None,
        Some(Value::Str(error)) => Some(error),
        Some(other) => {
            return Err(IpcError::Malformed(format!(
                "error must be a string or null, got {}",
                other.kind()
            )));
        }
    };

    if result.is_some() == error.is_some() {
        return Err(IpcError::Malformed(
            "reply must carry exactly one of result and error".to_string(),
        ));
    }
    Ok(RpcReply { result, error })
}

fn into_envelope(value: Value) -> Result<Map, IpcError> {
    match value {
        Value::Map(map) => Ok(map),
        other => Err(IpcError::Malformed(format!(
            "envelope must be a mapping, got {}",
            other.kind()
        ))),
    }
}

fn to_json(value: Value, frames: &mut Vec<Vec<u8>>) -> Json {
    match value {
        Value::Null => Json::Null,
        Value::Bool(value) => Json::Bool(value),
        Value::Int(value) => Json::from(value),
        Value::Float(value) => Number::from_f64(value).map_or(Json::Null, Json::Number),
        Value::Str(value) => Json::String(value),
        Value::List(items) => Json::Array(items.into_iter().map(|v| to_json(v, frames)).collect()),
        Value::Map(map) => Json::Object(
            map.into_iter()
                .map(|(key, value)| (key, to_json(value, frames)))
                .collect(),
        ),
        Value::Tensor(tensor) => {
            let index = frames.len();
            let placeholder = serde_json::json!({
                ARRAY_KEY: index,
                "dtype": tensor.dtype().tag(),
                "shape": tensor.shape(),
            });
            frames.push(tensor.into_bytes());
            placeholder
        }
    }
}

fn from_json(json: Json, slots: &mut [Option<Vec<u8>>]) -> Result<Value, IpcError> {
    Ok(match json {
        Json::Null => Value::Null,
        Json::Bool(value) => Value::Bool(value),
        Json::Number(number) => match number.as_i64() {
            Some(value) => Value::Int(value),
            None => Value::Float(number.as_f64().unwrap_or(f64::NAN)),
        },
        Json::String(value) => Value::Str(value),
        Json::Array(items) => Value::List(
            items
                .into_iter()
                .map(|item| from_json(item, slots))
                .collect::<Result<_, _>>()?,
        ),
        Json::Object(object) if object.contains_key(ARRAY_KEY) => {
            Value::Tensor(resolve_placeholder(&object, slots)?)
        }
        Json::Object(object) => Value::Map(
            object
                .into_iter()
                .map(|(key, value)| Ok((key, from_json(value, slots)?)))
                .collect::<Result<_, IpcError>>()?,
        ),
    })
}

fn resolve_placeholder(
    object: &serde_json::Map<String, Json>,
    slots: &mut [Option<Vec<u8>>],
) -> Result<Tensor, IpcError> {
    let index = object
        .get(ARRAY_KEY)
        .and_then(Json::as_u64)
        .ok_or_else(|| IpcError::Malformed("array index must be an unsigned integer".to_string()))?;
    let dtype = object
        .get("dtype")
        .and_then(Json::as_str)
        .and_then(DType::from_tag)
        .ok_or_else(|| IpcError::Malformed(format!("array {index} has an unsupported dtype")))?;
    let shape = object
        .get("shape")
        .and_then(Json::as_array)
        .and_then(|dims| {
            dims.iter()
                .map(|dim| dim.as_u64().and_then(|dim| usize::try_from(dim).ok()))
                .collect::<Option<Vec<usize>>>()
        })
        .ok_or_else(|| IpcError::Malformed(format!("array {index} has an invalid shape")))?;

    if index == 0 || index >= slots.len() as u64 {
        return Err(IpcError::Malformed(format!(
            "array frame index {index} out of range 1..{}",
            slots.len()
        )));
    }
    let bytes = slots[index as usize]
        .take()
        .ok_or_else(|| IpcError::Malformed(format!("array frame {index} referenced twice")))?;

    Tensor::from_bytes(dtype, shape, bytes)
        .map_err(|err| IpcError::Malformed(format!("array frame {index}: {err}")))
}

#[cfg(test)]
mod tests {
    use gymproxy_core::{DType, Map, Tensor, Value};

    use super::{decode, encode};

    #[test]
    fn tensors_move_to_trailing_frames() {
        let image = Tensor::zeros(DType::U8, vec![2, 3, 3]).expect("image");
        let frames = encode(Value::Map(Map::from([(
            "img".to_string(),
            Value::Tensor(image),
        )])))
        .expect("encode");

        assert_eq!(frames.len(), 2);
        assert_eq!(frames[1].len(), 18);
        let text = String::from_utf8(frames[0].clone()).expect("frame 0 is utf-8");
        assert_eq!(
            text,
            r#"{"img":{"__array__":1,"dtype":"uint8","shape":[2,3,3]}}"#
        );
    }

    #[test]
    fn non_finite_floats_become_null() {
        let frames = encode(Value::List(vec![Value::Float(f64::INFINITY)])).expect("encode");
        assert_eq!(frames[0], b"[null]");
        assert_eq!(decode(frames).expect("decode"), Value::List(vec![Value::Null]));
    }
}

/// Producer wire-protocol request codes.
///
/// Dispatch is a single match over this enum in the producer service; the
/// argument payloads live in the parcel that accompanies the code.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u32)]
#[allow(missing_docs)]
pub enum RequestCode {
    RequestBuffer = 0,
    RequestBuffers = 1,
    CancelBuffer = 2,
    FlushBuffer = 3,
    FlushBuffers = 4,
    GetLastFlushedBuffer = 5,
    AttachBuffer = 6,
    AttachBufferToQueue = 7,
    DetachBuffer = 8,
    DetachBufferFromQueue = 9,
    GetQueueSize = 10,
    SetQueueSize = 11,
    GetName = 12,
    GetNameAndUniqueId = 13,
    GetDefaultWidth = 14,
    GetDefaultHeight = 15,
    GetDefaultUsage = 16,
    SetDefaultUsage = 17,
    GetUniqueId = 18,
    CleanCache = 19,
    GoBackground = 20,
    RegisterReleaseListener = 21,
    UnregisterReleaseListener = 22,
    RegisterDeathRecipient = 23,
    Connect = 24,
    Disconnect = 25,
    ConnectStrictly = 26,
    DisconnectStrictly = 27,
    SetTransform = 28,
    GetTransform = 29,
    SetTransformHint = 30,
    GetTransformHint = 31,
    SetScalingMode = 32,
    SetMetadata = 33,
    SetMetadataSet = 34,
    SetTunnelHandle = 35,
    GetPresentTimestamp = 36,
    SetBufferHold = 37,
    SetBufferName = 38,
    SetSurfaceSourceType = 39,
    GetSurfaceSourceType = 40,
    SetSurfaceAppFrameworkType = 41,
    GetSurfaceAppFrameworkType = 42,
    SetHdrWhitePointBrightness = 43,
    SetSdrWhitePointBrightness = 44,
    AcquireLastFlushedBuffer = 45,
    ReleaseLastFlushedBuffer = 46,
    SetGlobalAlpha = 47,
    RequestAndDetachBuffer = 48,
    AttachAndFlushBuffer = 49,
    GetCycleBuffersNumber = 50,
    SetCycleBuffersNumber = 51,
}

impl RequestCode {
    /// Decodes a wire value.
    pub fn from_u32(value: u32) -> Option<RequestCode> {
        use RequestCode::*;
        Some(match value {
            0 => RequestBuffer,
            1 => RequestBuffers,
            2 => CancelBuffer,
            3 => FlushBuffer,
            4 => FlushBuffers,
            5 => GetLastFlushedBuffer,
            6 => AttachBuffer,
            7 => AttachBufferToQueue,
            8 => DetachBuffer,
            9 => DetachBufferFromQueue,
            10 => GetQueueSize,
            11 => SetQueueSize,
            12 => GetName,
            13 => GetNameAndUniqueId,
            14 => GetDefaultWidth,
            15 => GetDefaultHeight,
            16 => GetDefaultUsage,
            17 => SetDefaultUsage,
            18 => GetUniqueId,
            19 => CleanCache,
            20 => GoBackground,
            21 => RegisterReleaseListener,
            22 => UnregisterReleaseListener,
            23 => RegisterDeathRecipient,
            24 => Connect,
            25 => Disconnect,
            26 => ConnectStrictly,
            27 => DisconnectStrictly,
            28 => SetTransform,
            29 => GetTransform,
            30 => SetTransformHint,
            31 => GetTransformHint,
            32 => SetScalingMode,
            33 => SetMetadata,
            34 => SetMetadataSet,
            35 => SetTunnelHandle,
            36 => GetPresentTimestamp,
            37 => SetBufferHold,
            38 => SetBufferName,
            39 => SetSurfaceSourceType,
            40 => GetSurfaceSourceType,
            41 => SetSurfaceAppFrameworkType,
            42 => GetSurfaceAppFrameworkType,
            43 => SetHdrWhitePointBrightness,
            44 => SetSdrWhitePointBrightness,
            45 => AcquireLastFlushedBuffer,
            46 => ReleaseLastFlushedBuffer,
            47 => SetGlobalAlpha,
            48 => RequestAndDetachBuffer,
            49 => AttachAndFlushBuffer,
            50 => GetCycleBuffersNumber,
            51 => SetCycleBuffersNumber,
            _ => return None,
        })
    }

    /// Whether a code only reads queue state. Query codes bypass the
    /// connected-pid check so diagnostics work from any process.
    pub fn is_query(&self) -> bool {
        use RequestCode::*;
        matches!(
            self,
            GetQueueSize
                | GetName
                | GetNameAndUniqueId
                | GetDefaultWidth
                | GetDefaultHeight
                | GetDefaultUsage
                | GetUniqueId
                | GetTransform
                | GetTransformHint
                | GetSurfaceSourceType
                | GetSurfaceAppFrameworkType
                | GetPresentTimestamp
                | GetLastFlushedBuffer
                | GetCycleBuffersNumber
        )
    }
}

/// Listener wire-protocol codes, sent consumer-to-producer, always async.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u32)]
#[allow(missing_docs)]
pub enum ListenerCode {
    OnBufferReleased = 0,
    OnBufferReleasedWithFence = 1,
}

impl ListenerCode {
    /// Decodes a wire value.
    pub fn from_u32(value: u32) -> Option<ListenerCode> {
        Some(match value {
            0 => ListenerCode::OnBufferReleased,
            1 => ListenerCode::OnBufferReleasedWithFence,
            _ => return None,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn codes_round_trip() {
        for value in 0..=51 {
            let code = RequestCode::from_u32(value).expect("contiguous code space");
            assert_eq!(code as u32, value);
        }
        assert!(RequestCode::from_u32(52).is_none());
    }

    #[test]
    fn query_codes_do_not_mutate() {
        assert!(RequestCode::GetQueueSize.is_query());
        assert!(!RequestCode::SetQueueSize.is_query());
        assert!(!RequestCode::RequestBuffer.is_query());
    }
}

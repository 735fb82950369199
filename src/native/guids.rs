//! Class and interface identifiers of the hosting API (`metahost.h`, `mscoree.h`, `mscorlib.tlh`).

use uguid::{guid, Guid};

/// `CLSID_CLRMetaHost` - the runtime-hosting root object
pub const CLSID_CLR_META_HOST: Guid = guid!("9280188d-0e8e-4867-b30c-7fa83884e8de");
/// `IID_ICLRMetaHost`
pub const IID_ICLR_META_HOST: Guid = guid!("d332db9e-b9b3-4125-8207-a14884f53216");
/// `IID_ICLRRuntimeInfo`
pub const IID_ICLR_RUNTIME_INFO: Guid = guid!("bd39d1d2-ba2f-486a-89b0-b4b0cb466891");
/// `CLSID_CLRRuntimeHost` - the current-generation host
pub const CLSID_CLR_RUNTIME_HOST: Guid = guid!("90f1a06e-7712-4762-86b5-7a5eba6bdb02");
/// `IID_ICLRRuntimeHost`
pub const IID_ICLR_RUNTIME_HOST: Guid = guid!("90f1a06c-7712-4762-86b5-7a5eba6bdb02");
/// `CLSID_CorRuntimeHost` - the legacy host
pub const CLSID_COR_RUNTIME_HOST: Guid = guid!("cb2f6723-ab3a-11d2-9c40-00c04fa30a3e");
/// `IID_ICorRuntimeHost`
pub const IID_ICOR_RUNTIME_HOST: Guid = guid!("cb2f6722-ab3a-11d2-9c40-00c04fa30a3e");
/// `IID__AppDomain`
pub const IID_APP_DOMAIN: Guid = guid!("05f696dc-2b29-3663-ad8b-c4389cf2a713");

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn in_memory_layout() {
        // Data1 is stored little-endian, Data4 byte-wise
        assert_eq!(
            CLSID_CLR_META_HOST.to_bytes(),
            [
                0x8d, 0x18, 0x80, 0x92, 0x8e, 0x0e, 0x67, 0x48, 0xb3, 0x0c, 0x7f, 0xa8, 0x38, 0x84,
                0xe8, 0xde
            ]
        );
        assert_eq!(std::mem::size_of::<Guid>(), 16);
    }

    #[test]
    fn host_identifiers_differ_only_in_data1() {
        let class = CLSID_COR_RUNTIME_HOST.to_bytes();
        let interface = IID_ICOR_RUNTIME_HOST.to_bytes();
        assert_eq!(class[0], 0x23);
        assert_eq!(interface[0], 0x22);
        assert_eq!(class[4..], interface[4..]);
    }
}

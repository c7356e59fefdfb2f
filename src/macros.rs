/// Create a patch session from two images in one step
/// # Example
/// ```no_run
/// # use flash_patcher::patch_session;
/// // from files
/// let session = patch_session!("internal.bin", "external.bin");
/// // from memory
/// # let (internal, external) = (vec![0u8; 16], vec![0u8; 16]);
/// let session = patch_session!(&internal, &external);
/// // with the extended internal tier
/// let session = patch_session!("internal.bin", "external.bin", extended: true);
/// ```
#[macro_export]
macro_rules! patch_session {
    ($internal:expr, $external:expr) => {
        $crate::SessionBuilder::from_readers($internal, $external).and_then(|builder| builder.build())
    };
    ($internal:expr, $external:expr, extended: $extended:expr) => {
        $crate::SessionBuilder::from_readers($internal, $external)
            .and_then(|builder| builder.extended($extended).build())
    };
}

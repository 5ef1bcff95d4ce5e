//! Process-wide image selection cache across many dispatches
//!
//! Kept in its own test binary so no other test touches the global catalog.

use offload_backends::image::{DeviceImage, ImageBundle, ImageCatalog, ImageFormat};
use offload_backends::OrderedBackend;
use offload_core::combiner::Plus;
use offload_core::{Executor, Reduction, RuntimeConfig};

static IMAGES: [DeviceImage<'static>; 2] = [
    DeviceImage::new("spir64", ImageFormat::Spirv, &[0x03, 0x02, 0x23, 0x07]),
    DeviceImage::new("gfxA", ImageFormat::Native, &[0x7f]),
];

#[test]
fn test_rebuilt_bundles_do_not_grow_global_catalog() -> offload_core::Result<()> {
    let exec = Executor::with_backend(OrderedBackend::ascending().with_target("gfxA"))
        .with_config(RuntimeConfig::new().with_group_count(2));
    let data = [1u32, 2, 3];

    for _ in 0..500 {
        let bundle = ImageBundle::from_images(IMAGES.to_vec());
        let mut sum = 0u32;
        Reduction::builder(&mut sum, Plus)
            .image_bundle(&bundle)
            .build()?
            .run(&exec, data.len(), |i, r| r.combine(data[i]))?;
        assert_eq!(sum, 6);
    }

    assert_eq!(ImageCatalog::global().len(), 1);
    Ok(())
}

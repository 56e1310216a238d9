use ze_gfx::backend::{CpuDescriptorHandle, DeviceError, GpuDescriptorHandle, PipelineBindPoint};
use ze_gpu_context::{CommandList, GpuContext};

/// Copy `descriptors` into this frame's shader visible heap and bind them as one table
pub(crate) fn bind_descriptor_table(
    context: &GpuContext,
    cmd_list: &mut CommandList,
    bind_point: PipelineBindPoint,
    parameter: u32,
    descriptors: &[CpuDescriptorHandle],
) -> Result<GpuDescriptorHandle, DeviceError> {
    let table = copy_descriptor_table(context, cmd_list, descriptors)?;
    cmd_list.set_root_descriptor_table(bind_point, parameter, table);
    Ok(table)
}

/// Like [`bind_descriptor_table`], for tables bound later by someone else
pub(crate) fn copy_descriptor_table(
    context: &GpuContext,
    cmd_list: &mut CommandList,
    descriptors: &[CpuDescriptorHandle],
) -> Result<GpuDescriptorHandle, DeviceError> {
    let mut range = context.allocate_contiguous_descriptor_range(descriptors.len() as u32)?;
    let device = context.device().clone();
    for descriptor in descriptors {
        range.push_copy(device.as_ref(), *descriptor);
    }

    // Frame ranges all live in one heap, rebinding it keeps the table valid on any list
    cmd_list.set_descriptor_heaps(&[range.heap()]);
    Ok(range.gpu_handle(0))
}

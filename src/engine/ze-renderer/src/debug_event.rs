use std::ops::{Deref, DerefMut};
use ze_gpu_context::CommandList;

/// Named debug region on a command list, closed when dropped
pub struct DebugEventScope<'a> {
    cmd_list: &'a mut CommandList,
}

impl<'a> DebugEventScope<'a> {
    pub fn new(cmd_list: &'a mut CommandList, name: &str) -> Self {
        cmd_list.begin_event(name);
        Self { cmd_list }
    }
}

impl Deref for DebugEventScope<'_> {
    type Target = CommandList;

    fn deref(&self) -> &Self::Target {
        self.cmd_list
    }
}

impl DerefMut for DebugEventScope<'_> {
    fn deref_mut(&mut self) -> &mut Self::Target {
        self.cmd_list
    }
}

impl Drop for DebugEventScope<'_> {
    fn drop(&mut self) {
        self.cmd_list.end_event();
    }
}

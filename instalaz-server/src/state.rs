use libinstalaz::scheduler::Scheduler;
use libinstalaz::service::InstalazService;

#[derive(Clone)]
pub struct AppState {
    pub service: InstalazService,
    pub scheduler: Scheduler,
}

impl AppState {
    pub fn new(service: InstalazService) -> libinstalaz::Result<Self> {
        let scheduler = service.scheduler()?;
        Ok(Self { service, scheduler })
    }
}

mod keyed_mutex;
mod texture;

pub use keyed_mutex::D3D11KeyedMutex;
pub use texture::{D3D11ImageDevice, D3D11RenderTarget, D3D11SharedHandle, D3D11Texture};
